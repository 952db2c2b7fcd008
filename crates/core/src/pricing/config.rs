use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::{RepairType, UrgencyLevel};
use crate::money::{Factor, FactorBounds, Money};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkTier {
    pub min_quantity: u32,
    pub discount_rate: Decimal,
}

/// Immutable pricing tables injected into the engine at construction time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    pub factor_bounds: FactorBounds,
    /// Base price used when no rule matches, per repair type.
    pub fallback_base_prices: BTreeMap<RepairType, Money>,
    pub default_fallback_price: Money,
    /// Urgency multipliers for fallback pricing only; rules carry their own.
    pub urgency_multipliers: BTreeMap<UrgencyLevel, Factor>,
    /// Month (1..=12) to seasonal factor, used when a rule leaves it unset.
    pub seasonal_factors: BTreeMap<u32, Factor>,
    pub standard_quote_validity: Duration,
    pub elevated_quote_validity: Duration,
    pub bulk_tiers: Vec<BulkTier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let fallback_base_prices = [
            (RepairType::ScreenRepair, 120),
            (RepairType::BatteryReplacement, 80),
            (RepairType::WaterDamage, 150),
            (RepairType::AudioRepair, 90),
            (RepairType::ChargingPort, 70),
            (RepairType::SoftwareIssue, 60),
        ]
        .into_iter()
        .map(|(repair_type, major)| (repair_type, Money::from_major(major)))
        .collect();

        let urgency_multipliers = [
            (UrgencyLevel::Standard, Factor::ONE),
            (UrgencyLevel::Urgent, Factor::from_parts(15, 1)),
            (UrgencyLevel::Emergency, Factor::from_parts(2, 0)),
        ]
        .into_iter()
        .collect();

        Self {
            factor_bounds: FactorBounds::default(),
            fallback_base_prices,
            default_fallback_price: Money::from_major(80),
            urgency_multipliers,
            seasonal_factors: BTreeMap::new(),
            standard_quote_validity: Duration::hours(24),
            elevated_quote_validity: Duration::hours(2),
            bulk_tiers: vec![
                BulkTier { min_quantity: 2, discount_rate: Decimal::new(5, 2) },
                BulkTier { min_quantity: 5, discount_rate: Decimal::new(10, 2) },
            ],
        }
    }
}

impl PricingConfig {
    pub fn fallback_price(&self, repair_type: RepairType) -> Money {
        self.fallback_base_prices
            .get(&repair_type)
            .copied()
            .unwrap_or(self.default_fallback_price)
    }

    pub fn fallback_urgency_multiplier(&self, urgency: UrgencyLevel) -> Option<Factor> {
        self.urgency_multipliers.get(&urgency).copied()
    }

    pub fn seasonal_factor_at(&self, at: DateTime<Utc>) -> Option<Factor> {
        self.seasonal_factors.get(&at.month()).copied()
    }

    pub fn quote_validity(&self, urgency: UrgencyLevel) -> Duration {
        if urgency.is_elevated() {
            self.elevated_quote_validity
        } else {
            self.standard_quote_validity
        }
    }

    /// Discount of the highest tier whose threshold `quantity` reaches.
    pub fn bulk_discount_rate(&self, quantity: u32) -> Decimal {
        self.bulk_tiers
            .iter()
            .filter(|tier| quantity >= tier.min_quantity)
            .max_by_key(|tier| tier.min_quantity)
            .map(|tier| tier.discount_rate)
            .unwrap_or(Decimal::ZERO)
    }
}
