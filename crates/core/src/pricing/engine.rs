use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::pricing_rule::{PricingFactors, PricingRule, RuleDraft, RuleId, RuleScope};
use crate::errors::{ApplicationError, DomainError};
use crate::money::Money;
use crate::ports::{DeviceCatalog, PricingRuleRepository};
use crate::pricing::config::PricingConfig;
use crate::pricing::quote::{compute_quote, PriceQuote, QuoteRequest};
use crate::pricing::selection::select_rule;

/// Resolves quotes and administers pricing rules.
///
/// The engine holds no mutable state of its own: configuration is fixed at
/// construction and every rule read or write goes through the repository.
#[derive(Clone)]
pub struct PricingEngine {
    config: PricingConfig,
    rules: Arc<dyn PricingRuleRepository>,
    devices: Arc<dyn DeviceCatalog>,
}

impl PricingEngine {
    pub fn new(
        config: PricingConfig,
        rules: Arc<dyn PricingRuleRepository>,
        devices: Arc<dyn DeviceCatalog>,
    ) -> Self {
        Self { config, rules, devices }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<PriceQuote, ApplicationError> {
        let device_model_id = &request.device_model_id;
        if self.devices.find_device(device_model_id).await?.is_none() {
            return Err(ApplicationError::DeviceNotFound(device_model_id.clone()));
        }

        let at = request.evaluated_at;
        let specific = RuleScope::Specific(device_model_id.clone());
        let mut candidates =
            self.rules.find_active_rules(&specific, request.repair_type, at).await?;
        candidates.extend(
            self.rules.find_active_rules(&RuleScope::Generic, request.repair_type, at).await?,
        );

        let selection = select_rule(device_model_id, request.repair_type, at, candidates);
        if !selection.shadowed.is_empty() {
            warn!(
                event_name = "pricing.rule_scope_violation",
                device_model_id = %device_model_id,
                repair_type = %request.repair_type,
                selected_rule_id = ?selection.rule.as_ref().map(|rule| rule.id.to_string()),
                shadowed = ?selection.shadowed,
                "multiple active pricing rules share a scope; using the most recent"
            );
        }

        let quote = compute_quote(&self.config, request, &selection)?;
        debug!(
            event_name = "pricing.quote_resolved",
            device_model_id = %device_model_id,
            repair_type = %request.repair_type,
            urgency = %request.urgency,
            rule_id = ?quote.rule_id.as_ref().map(ToString::to_string),
            final_price_minor = quote.final_price.minor_units(),
            "price quote resolved"
        );
        Ok(quote)
    }

    pub async fn get_rule(&self, rule_id: &RuleId) -> Result<PricingRule, ApplicationError> {
        self.rules
            .find_rule(rule_id)
            .await?
            .ok_or_else(|| ApplicationError::RuleNotFound(rule_id.clone()))
    }

    pub async fn create_rule(
        &self,
        draft: RuleDraft,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        self.validate_values(draft.base_price, &draft.factors)?;
        if let (Some(from), Some(until)) = (draft.valid_from, draft.valid_until) {
            if until <= from {
                return Err(DomainError::InvariantViolation(format!(
                    "rule validity window ends at {until}, not after its start {from}"
                ))
                .into());
            }
        }

        let rule = PricingRule::from_draft(RuleId::generate(), draft, now);
        if rule.is_active {
            self.ensure_no_active_conflict(&rule, now).await?;
        }
        self.rules.insert_rule(&rule).await?;

        info!(
            event_name = "pricing.rule_created",
            rule_id = %rule.id,
            scope = %rule.scope,
            repair_type = %rule.repair_type,
            is_active = rule.is_active,
            "pricing rule created"
        );
        Ok(rule)
    }

    /// Activates a rule after checking no other active rule covers its scope.
    ///
    /// A rule whose window already closed (for instance one deactivated
    /// earlier) reopens from `now` with no end bound.
    pub async fn activate_rule(
        &self,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        let mut rule = self.get_rule(rule_id).await?;
        if rule.is_active {
            return Ok(rule);
        }
        self.validate_values(rule.base_price, &rule.factors)?;

        if rule.valid_until.is_some_and(|until| until <= now) {
            rule.valid_from = Some(now);
            rule.valid_until = None;
        }
        rule.is_active = true;
        rule.updated_at = now;
        self.ensure_no_active_conflict(&rule, now).await?;

        let expected = rule.version;
        rule.version = self.rules.save_rule(&rule, expected).await?;
        info!(
            event_name = "pricing.rule_activated",
            rule_id = %rule.id,
            scope = %rule.scope,
            repair_type = %rule.repair_type,
            version = rule.version,
            "pricing rule activated"
        );
        Ok(rule)
    }

    /// Deactivation never conflicts; it closes the rule's window at `now`.
    pub async fn deactivate_rule(
        &self,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        let mut rule = self.get_rule(rule_id).await?;
        if !rule.is_active {
            return Ok(rule);
        }

        rule.is_active = false;
        rule.valid_until = Some(now);
        rule.updated_at = now;

        let expected = rule.version;
        rule.version = self.rules.save_rule(&rule, expected).await?;
        info!(
            event_name = "pricing.rule_deactivated",
            rule_id = %rule.id,
            version = rule.version,
            "pricing rule deactivated"
        );
        Ok(rule)
    }

    fn validate_values(
        &self,
        base_price: Money,
        factors: &PricingFactors,
    ) -> Result<(), DomainError> {
        if !base_price.is_positive() {
            return Err(DomainError::InvariantViolation(format!(
                "rule base price must be positive, got {base_price}"
            )));
        }
        for (name, factor) in factors.named() {
            if let Some(factor) = factor {
                self.config.factor_bounds.check(name, factor)?;
            }
        }
        Ok(())
    }

    async fn ensure_no_active_conflict(
        &self,
        rule: &PricingRule,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let active = self.rules.find_active_rules(&rule.scope, rule.repair_type, now).await?;
        let conflicting =
            active.into_iter().find(|other| other.id != rule.id && other.shares_scope_with(rule));
        match conflicting {
            Some(conflicting) => {
                warn!(
                    event_name = "pricing.rule_conflict",
                    rule_id = %rule.id,
                    conflicting_rule_id = %conflicting.id,
                    scope = %rule.scope,
                    repair_type = %rule.repair_type,
                    "pricing rule activation rejected"
                );
                Err(DomainError::RuleConflict {
                    scope: rule.scope.clone(),
                    repair_type: rule.repair_type,
                    conflicting_rule_id: Some(conflicting.id),
                }
                .into())
            }
            None => Ok(()),
        }
    }
}
