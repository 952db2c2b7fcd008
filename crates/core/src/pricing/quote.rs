use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::{RepairType, UrgencyLevel};
use crate::domain::device::DeviceModelId;
use crate::domain::pricing_rule::RuleId;
use crate::errors::DomainError;
use crate::money::{round_half_up, Factor, Money};
use crate::pricing::config::PricingConfig;
use crate::pricing::selection::{PriceSource, RuleSelection};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceComponent {
    Urgency,
    Complexity,
    MarketDemand,
    Seasonal,
}

impl PriceComponent {
    pub fn factor_name(&self) -> &'static str {
        match self {
            Self::Urgency => "urgency_multiplier",
            Self::Complexity => "complexity_multiplier",
            Self::MarketDemand => "market_demand",
            Self::Seasonal => "seasonal_factor",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorSource {
    Override,
    Rule,
    Configuration,
    Default,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub component: PriceComponent,
    pub factor: Factor,
    pub source: FactorSource,
}

/// Factors in the order they were applied to the base price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_price: Money,
    pub entries: Vec<BreakdownEntry>,
}

impl PriceBreakdown {
    pub fn combined_factor(&self) -> Decimal {
        self.entries.iter().fold(Decimal::ONE, |product, entry| product * entry.factor.value())
    }

    /// Unrounded final price in minor units.
    pub fn exact_minor_units(&self) -> Decimal {
        self.base_price.as_minor_decimal() * self.combined_factor()
    }

    pub fn reproduce_final_price(&self) -> Result<Money, DomainError> {
        round_half_up(self.exact_minor_units())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteOverrides {
    pub urgency_multiplier: Option<Factor>,
    pub complexity_multiplier: Option<Factor>,
    pub market_demand: Option<Factor>,
    pub seasonal_factor: Option<Factor>,
    /// Requests a bulk quote for this many units.
    pub quantity: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub device_model_id: DeviceModelId,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub overrides: QuoteOverrides,
}

impl QuoteRequest {
    pub fn new(
        device_model_id: DeviceModelId,
        repair_type: RepairType,
        urgency: UrgencyLevel,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_model_id,
            repair_type,
            urgency,
            evaluated_at,
            overrides: QuoteOverrides::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkQuote {
    pub quantity: u32,
    pub discount_rate: Decimal,
    pub unit_price: Money,
    pub total: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// `None` when the quote was priced from the fallback table.
    pub rule_id: Option<RuleId>,
    pub source: PriceSource,
    pub device_model_id: DeviceModelId,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub base_price: Money,
    pub final_price: Money,
    pub breakdown: PriceBreakdown,
    pub evaluated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub bulk: Option<BulkQuote>,
}

impl PriceQuote {
    pub fn is_fallback(&self) -> bool {
        self.rule_id.is_none()
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at < self.valid_until
    }

    pub fn payable_total(&self) -> Money {
        self.bulk.as_ref().map_or(self.final_price, |bulk| bulk.total)
    }
}

/// Prices `request` against an already-selected rule.
///
/// Pure: the same request, selection and configuration always yield the same
/// quote.
pub fn compute_quote(
    config: &PricingConfig,
    request: &QuoteRequest,
    selection: &RuleSelection,
) -> Result<PriceQuote, DomainError> {
    let rule = selection.rule.as_ref();
    let overrides = &request.overrides;
    let bounds = config.factor_bounds;

    let base_price =
        rule.map_or_else(|| config.fallback_price(request.repair_type), |rule| rule.base_price);

    let urgency = match (overrides.urgency_multiplier, rule) {
        (Some(factor), _) => (factor, FactorSource::Override),
        (None, _) if !request.urgency.is_elevated() => (Factor::ONE, FactorSource::Default),
        (None, Some(rule)) => resolve(None, rule.factors.urgency_multiplier, None),
        (None, None) => resolve(None, None, config.fallback_urgency_multiplier(request.urgency)),
    };
    let complexity = resolve(
        overrides.complexity_multiplier,
        rule.and_then(|rule| rule.factors.complexity_multiplier),
        None,
    );
    let market_demand =
        resolve(overrides.market_demand, rule.and_then(|rule| rule.factors.market_demand), None);
    let seasonal = resolve(
        overrides.seasonal_factor,
        rule.and_then(|rule| rule.factors.seasonal_factor),
        config.seasonal_factor_at(request.evaluated_at),
    );

    let mut entries = Vec::with_capacity(4);
    for (component, (factor, source)) in [
        (PriceComponent::Urgency, urgency),
        (PriceComponent::Complexity, complexity),
        (PriceComponent::MarketDemand, market_demand),
        (PriceComponent::Seasonal, seasonal),
    ] {
        let factor = bounds.check(component.factor_name(), factor)?;
        entries.push(BreakdownEntry { component, factor, source });
    }

    let breakdown = PriceBreakdown { base_price, entries };
    let final_price = breakdown.reproduce_final_price()?;

    let bulk = match overrides.quantity {
        Some(quantity) => Some(bulk_quote(config, final_price, quantity)?),
        None => None,
    };

    Ok(PriceQuote {
        rule_id: rule.map(|rule| rule.id.clone()),
        source: selection.source,
        device_model_id: request.device_model_id.clone(),
        repair_type: request.repair_type,
        urgency: request.urgency,
        base_price,
        final_price,
        breakdown,
        evaluated_at: request.evaluated_at,
        valid_until: request.evaluated_at + config.quote_validity(request.urgency),
        bulk,
    })
}

fn resolve(
    overridden: Option<Factor>,
    from_rule: Option<Factor>,
    configured: Option<Factor>,
) -> (Factor, FactorSource) {
    overridden
        .map(|factor| (factor, FactorSource::Override))
        .or_else(|| from_rule.map(|factor| (factor, FactorSource::Rule)))
        .or_else(|| configured.map(|factor| (factor, FactorSource::Configuration)))
        .unwrap_or((Factor::ONE, FactorSource::Default))
}

/// Discount is taken off each unit before multiplying by the quantity, and
/// the result is rounded once.
pub fn bulk_quote(
    config: &PricingConfig,
    unit_final_price: Money,
    quantity: u32,
) -> Result<BulkQuote, DomainError> {
    if quantity == 0 {
        return Err(DomainError::InvalidQuantity { quantity });
    }

    let discount_rate = config.bulk_discount_rate(quantity);
    let discounted_unit = unit_final_price.as_minor_decimal() * (Decimal::ONE - discount_rate);

    Ok(BulkQuote {
        quantity,
        discount_rate,
        unit_price: round_half_up(discounted_unit)?,
        total: round_half_up(discounted_unit * Decimal::from(quantity))?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{bulk_quote, compute_quote, FactorSource, PriceComponent, QuoteRequest};
    use crate::domain::booking::{RepairType, UrgencyLevel};
    use crate::domain::device::DeviceModelId;
    use crate::domain::pricing_rule::{PricingFactors, PricingRule, RuleDraft, RuleId, RuleScope};
    use crate::errors::DomainError;
    use crate::money::{Factor, Money};
    use crate::pricing::config::PricingConfig;
    use crate::pricing::selection::{PriceSource, RuleSelection};

    fn device() -> DeviceModelId {
        DeviceModelId("iphone-13".to_string())
    }

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn specific_rule(factors: PricingFactors) -> RuleSelection {
        let rule = PricingRule::from_draft(
            RuleId("PR-1".to_string()),
            RuleDraft {
                scope: RuleScope::Specific(device()),
                repair_type: RepairType::ScreenRepair,
                base_price: Money::from_major(200),
                factors,
                valid_from: None,
                valid_until: None,
                is_active: true,
            },
            at() - Duration::days(1),
        );
        RuleSelection { rule: Some(rule), source: PriceSource::SpecificRule, shadowed: Vec::new() }
    }

    fn fallback() -> RuleSelection {
        RuleSelection { rule: None, source: PriceSource::Fallback, shadowed: Vec::new() }
    }

    #[test]
    fn urgent_rule_multiplier_applies_with_short_validity() {
        let selection = specific_rule(PricingFactors {
            urgency_multiplier: Some(Factor::from_parts(15, 1)),
            ..PricingFactors::default()
        });
        let request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Urgent, at());

        let quote = compute_quote(&PricingConfig::default(), &request, &selection).expect("quote");

        assert_eq!(quote.base_price, Money::from_major(200));
        assert_eq!(quote.final_price, Money::from_major(300));
        assert_eq!(quote.rule_id, Some(RuleId("PR-1".to_string())));
        assert_eq!(quote.valid_until, at() + Duration::hours(2));
    }

    #[test]
    fn standard_urgency_ignores_rule_urgency_multiplier() {
        let selection = specific_rule(PricingFactors {
            urgency_multiplier: Some(Factor::from_parts(15, 1)),
            ..PricingFactors::default()
        });
        let request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Standard, at());

        let quote = compute_quote(&PricingConfig::default(), &request, &selection).expect("quote");

        assert_eq!(quote.final_price, Money::from_major(200));
        assert_eq!(quote.valid_until, at() + Duration::hours(24));
        assert_eq!(quote.breakdown.entries[0].source, FactorSource::Default);
    }

    #[test]
    fn override_replaces_rule_urgency_multiplier() {
        let selection = specific_rule(PricingFactors {
            urgency_multiplier: Some(Factor::from_parts(15, 1)),
            ..PricingFactors::default()
        });
        let mut request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Urgent, at());
        request.overrides.urgency_multiplier = Some(Factor::from_parts(2, 0));

        let quote = compute_quote(&PricingConfig::default(), &request, &selection).expect("quote");

        assert_eq!(quote.final_price, Money::from_major(400));
        assert_eq!(quote.breakdown.entries[0].component, PriceComponent::Urgency);
        assert_eq!(quote.breakdown.entries[0].source, FactorSource::Override);
    }

    #[test]
    fn breakdown_reproduces_rounded_final_price() {
        let selection = specific_rule(PricingFactors {
            urgency_multiplier: Some(Factor::from_parts(13, 1)),
            complexity_multiplier: Some(Factor::from_parts(117, 2)),
            market_demand: Some(Factor::from_parts(103, 2)),
            seasonal_factor: Some(Factor::from_parts(99, 2)),
        });
        let request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Emergency, at());

        let quote = compute_quote(&PricingConfig::default(), &request, &selection).expect("quote");

        // 20000 * 1.3 * 1.17 * 1.03 * 0.99 = 31019.274
        assert_eq!(quote.breakdown.exact_minor_units(), Decimal::new(31_019_274, 3));
        assert_eq!(quote.final_price, Money::from_minor(31_019));
        assert_eq!(quote.breakdown.reproduce_final_price().expect("reproduce"), quote.final_price);
        assert_eq!(quote.breakdown.entries.len(), 4);
    }

    #[test]
    fn fallback_pricing_uses_configured_tables() {
        let mut config = PricingConfig::default();
        config.seasonal_factors.insert(3, Factor::from_parts(11, 1));
        let request =
            QuoteRequest::new(device(), RepairType::WaterDamage, UrgencyLevel::Emergency, at());

        let quote = compute_quote(&config, &request, &fallback()).expect("quote");

        // 150.00 * 2.0 * 1.1
        assert_eq!(quote.final_price, Money::from_major(330));
        assert!(quote.is_fallback());
        assert_eq!(quote.source, PriceSource::Fallback);
        assert_eq!(quote.breakdown.entries[3].source, FactorSource::Configuration);
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        let mut request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Standard, at());
        request.overrides.market_demand = Some(Factor::from_parts(4, 0));

        let error = compute_quote(&PricingConfig::default(), &request, &fallback())
            .expect_err("4.0 exceeds the ceiling");

        assert!(matches!(
            error,
            DomainError::InvalidFactorRange { ref factor, .. } if factor == "market_demand"
        ));
    }

    #[test]
    fn bulk_discount_is_per_unit_then_multiplied() {
        let config = PricingConfig::default();
        let unit = Money::from_minor(9_999);

        let single = bulk_quote(&config, unit, 1).expect("single");
        assert_eq!(single.total, unit);
        assert_eq!(single.discount_rate, Decimal::ZERO);

        let pair = bulk_quote(&config, unit, 2).expect("pair");
        // 9999 * 0.95 = 9499.05 per unit, 18998.10 total
        assert_eq!(pair.unit_price, Money::from_minor(9_499));
        assert_eq!(pair.total, Money::from_minor(18_998));

        let four = bulk_quote(&config, Money::from_major(100), 4).expect("four");
        assert_eq!(four.total, Money::from_major(380));

        let five = bulk_quote(&config, Money::from_major(100), 5).expect("five");
        assert_eq!(five.total, Money::from_major(450));
        assert_eq!(five.discount_rate, Decimal::new(10, 2));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let error = bulk_quote(&PricingConfig::default(), Money::from_major(100), 0)
            .expect_err("zero units");
        assert_eq!(error, DomainError::InvalidQuantity { quantity: 0 });
    }

    #[test]
    fn requested_quantity_attaches_bulk_quote() {
        let mut request =
            QuoteRequest::new(device(), RepairType::ScreenRepair, UrgencyLevel::Standard, at());
        request.overrides.quantity = Some(5);

        let quote = compute_quote(&PricingConfig::default(), &request, &fallback()).expect("quote");

        let bulk = quote.bulk.as_ref().expect("bulk quote");
        assert_eq!(quote.final_price, Money::from_major(120));
        assert_eq!(bulk.total, Money::from_major(540));
        assert_eq!(quote.payable_total(), Money::from_major(540));
    }
}
