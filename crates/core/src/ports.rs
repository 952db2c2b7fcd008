//! Storage contracts consumed by the pricing engine and the lifecycle
//! orchestrator. Implementations live in `repairdesk-db`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::booking::{Booking, BookingId, RepairType, TechnicianId};
use crate::domain::device::{DeviceModel, DeviceModelId};
use crate::domain::pricing_rule::{PricingRule, RuleId, RuleScope};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} `{id}` changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict { entity: &'static str, id: String, expected: u32, actual: u32 },
    #[error("{entity} `{id}` was not found")]
    Missing { entity: &'static str, id: String },
    #[error("{entity} `{id}` already exists")]
    Duplicate { entity: &'static str, id: String },
    #[error("an active pricing rule already exists for {scope} / {repair_type}")]
    ActiveScopeConflict { scope: RuleScope, repair_type: RepairType },
    #[error("status history of booking `{booking_id}` may only be appended to")]
    HistoryRewrite { booking_id: BookingId },
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn load_booking(&self, id: &BookingId) -> Result<Option<Booking>, StorageError>;

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError>;

    /// Writes `booking` only if the stored version still equals
    /// `expected_version`, returning the new version.
    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: u32,
    ) -> Result<u32, StorageError>;
}

#[async_trait]
pub trait PricingRuleRepository: Send + Sync {
    async fn find_rule(&self, id: &RuleId) -> Result<Option<PricingRule>, StorageError>;

    /// Active rules for exactly this scope and repair type that apply at `at`.
    async fn find_active_rules(
        &self,
        scope: &RuleScope,
        repair_type: RepairType,
        at: DateTime<Utc>,
    ) -> Result<Vec<PricingRule>, StorageError>;

    /// Must reject a second active rule in one scope with
    /// [`StorageError::ActiveScopeConflict`].
    async fn insert_rule(&self, rule: &PricingRule) -> Result<(), StorageError>;

    async fn save_rule(&self, rule: &PricingRule, expected_version: u32)
        -> Result<u32, StorageError>;
}

#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    async fn find_device(&self, id: &DeviceModelId) -> Result<Option<DeviceModel>, StorageError>;
}

#[async_trait]
pub trait TechnicianDirectory: Send + Sync {
    async fn available_technicians(&self) -> Result<Vec<TechnicianId>, StorageError>;
}
