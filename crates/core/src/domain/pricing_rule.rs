use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::booking::RepairType;
use crate::domain::device::DeviceModelId;
use crate::money::{Factor, Money};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn generate() -> Self {
        Self(format!("PR-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which bookings a rule prices: one device model, or every model (generic).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "device_model_id", rename_all = "snake_case")]
pub enum RuleScope {
    Generic,
    Specific(DeviceModelId),
}

impl RuleScope {
    pub fn from_device(device_model_id: Option<DeviceModelId>) -> Self {
        match device_model_id {
            Some(device_model_id) => Self::Specific(device_model_id),
            None => Self::Generic,
        }
    }

    pub fn device_model_id(&self) -> Option<&DeviceModelId> {
        match self {
            Self::Generic => None,
            Self::Specific(device_model_id) => Some(device_model_id),
        }
    }

    pub fn is_specific(&self) -> bool {
        matches!(self, Self::Specific(_))
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Specific(device_model_id) => write!(f, "device {device_model_id}"),
        }
    }
}

/// Optional multipliers carried by a rule; an absent factor counts as 1.0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingFactors {
    pub urgency_multiplier: Option<Factor>,
    pub complexity_multiplier: Option<Factor>,
    pub market_demand: Option<Factor>,
    pub seasonal_factor: Option<Factor>,
}

impl PricingFactors {
    pub fn named(&self) -> [(&'static str, Option<Factor>); 4] {
        [
            ("urgency_multiplier", self.urgency_multiplier),
            ("complexity_multiplier", self.complexity_multiplier),
            ("market_demand", self.market_demand),
            ("seasonal_factor", self.seasonal_factor),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: RuleId,
    pub scope: RuleScope,
    pub repair_type: RepairType,
    pub base_price: Money,
    pub factors: PricingFactors,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PricingRule {
    pub const INITIAL_VERSION: u32 = 1;

    pub fn from_draft(id: RuleId, draft: RuleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            scope: draft.scope,
            repair_type: draft.repair_type,
            base_price: draft.base_price,
            factors: draft.factors,
            valid_from: draft.valid_from,
            valid_until: draft.valid_until,
            is_active: draft.is_active,
            version: Self::INITIAL_VERSION,
            created_at: now,
            updated_at: now,
        }
    }

    /// `valid_from <= at < valid_until`, with absent bounds left open.
    pub fn is_applicable_at(&self, at: DateTime<Utc>) -> bool {
        let started = self.valid_from.map_or(true, |from| from <= at);
        let not_ended = self.valid_until.map_or(true, |until| at < until);
        started && not_ended
    }

    pub fn is_selectable_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.is_applicable_at(at)
    }

    pub fn shares_scope_with(&self, other: &PricingRule) -> bool {
        self.scope == other.scope && self.repair_type == other.repair_type
    }
}

/// Administrator input for a new rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub scope: RuleScope,
    pub repair_type: RepairType,
    pub base_price: Money,
    #[serde(default)]
    pub factors: PricingFactors,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}
