use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::booking::RepairType;
use crate::domain::device::DeviceModelId;
use crate::domain::pricing_rule::{PricingRule, RuleId, RuleScope};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    SpecificRule,
    GenericRule,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleSelection {
    pub rule: Option<PricingRule>,
    pub source: PriceSource,
    /// Other selectable rules of the winning tier. Non-empty only when the
    /// single-active-rule invariant was broken in storage.
    pub shadowed: Vec<RuleId>,
}

/// Picks the one rule that prices `device_model_id` / `repair_type` at `at`.
///
/// Specific rules outrank generic ones. Within a tier the most recently
/// created rule wins, ties broken by the greater id, so the choice is a total
/// order over the candidates.
pub fn select_rule(
    device_model_id: &DeviceModelId,
    repair_type: RepairType,
    at: DateTime<Utc>,
    candidates: impl IntoIterator<Item = PricingRule>,
) -> RuleSelection {
    let (specific, generic): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .filter(|rule| rule.repair_type == repair_type && rule.is_selectable_at(at))
        .filter(|rule| match &rule.scope {
            RuleScope::Specific(device) => device == device_model_id,
            RuleScope::Generic => true,
        })
        .partition(|rule| rule.scope.is_specific());

    if let Some(selection) = newest(specific, PriceSource::SpecificRule) {
        return selection;
    }
    if let Some(selection) = newest(generic, PriceSource::GenericRule) {
        return selection;
    }

    RuleSelection { rule: None, source: PriceSource::Fallback, shadowed: Vec::new() }
}

fn newest(mut tier: Vec<PricingRule>, source: PriceSource) -> Option<RuleSelection> {
    tier.sort_by(|left, right| {
        right.created_at.cmp(&left.created_at).then_with(|| right.id.cmp(&left.id))
    });
    let mut tier = tier.into_iter();
    let winner = tier.next()?;
    Some(RuleSelection {
        rule: Some(winner),
        source,
        shadowed: tier.map(|rule| rule.id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{select_rule, PriceSource};
    use crate::domain::booking::RepairType;
    use crate::domain::device::DeviceModelId;
    use crate::domain::pricing_rule::{PricingFactors, PricingRule, RuleDraft, RuleId, RuleScope};
    use crate::money::Money;

    fn rule(id: &str, scope: RuleScope, created_offset_hours: i64) -> PricingRule {
        let epoch = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        PricingRule::from_draft(
            RuleId(id.to_string()),
            RuleDraft {
                scope,
                repair_type: RepairType::ScreenRepair,
                base_price: Money::from_major(100),
                factors: PricingFactors::default(),
                valid_from: None,
                valid_until: None,
                is_active: true,
            },
            epoch + Duration::hours(created_offset_hours),
        )
    }

    fn device() -> DeviceModelId {
        DeviceModelId("iphone-13".to_string())
    }

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn specific_rule_outranks_newer_generic_rule() {
        let specific = rule("PR-specific", RuleScope::Specific(device()), 0);
        let generic = rule("PR-generic", RuleScope::Generic, 48);

        let selection = select_rule(&device(), RepairType::ScreenRepair, at(), [generic, specific]);

        assert_eq!(selection.source, PriceSource::SpecificRule);
        assert_eq!(selection.rule.map(|rule| rule.id.0), Some("PR-specific".to_string()));
        assert!(selection.shadowed.is_empty());
    }

    #[test]
    fn duplicate_specific_rules_resolve_to_most_recent() {
        let older = rule("PR-a", RuleScope::Specific(device()), 1);
        let newer = rule("PR-b", RuleScope::Specific(device()), 5);

        let selection = select_rule(&device(), RepairType::ScreenRepair, at(), [newer, older]);

        assert_eq!(selection.rule.map(|rule| rule.id.0), Some("PR-b".to_string()));
        assert_eq!(selection.shadowed, vec![RuleId("PR-a".to_string())]);
    }

    #[test]
    fn equal_creation_times_break_ties_by_id() {
        let first = rule("PR-a", RuleScope::Generic, 3);
        let second = rule("PR-z", RuleScope::Generic, 3);

        let forward =
            select_rule(&device(), RepairType::ScreenRepair, at(), [first.clone(), second.clone()]);
        let backward = select_rule(&device(), RepairType::ScreenRepair, at(), [second, first]);

        assert_eq!(forward, backward);
        assert_eq!(forward.rule.map(|rule| rule.id.0), Some("PR-z".to_string()));
    }

    #[test]
    fn rules_for_other_devices_types_or_windows_are_ignored() {
        let galaxy = RuleScope::Specific(DeviceModelId("galaxy-s23".to_string()));
        let other_device = rule("PR-other", galaxy, 0);
        let mut other_type = rule("PR-battery", RuleScope::Generic, 0);
        other_type.repair_type = RepairType::BatteryReplacement;
        let mut expired = rule("PR-expired", RuleScope::Generic, 0);
        expired.valid_until = Some(at());
        let mut inactive = rule("PR-inactive", RuleScope::Generic, 0);
        inactive.is_active = false;

        let selection = select_rule(
            &device(),
            RepairType::ScreenRepair,
            at(),
            [other_device, other_type, expired, inactive],
        );

        assert_eq!(selection.source, PriceSource::Fallback);
        assert!(selection.rule.is_none());
    }
}
