use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use repairdesk_core::domain::booking::{Booking, BookingId, RepairType, TechnicianId};
use repairdesk_core::domain::device::{DeviceModel, DeviceModelId};
use repairdesk_core::domain::pricing_rule::{PricingRule, RuleId, RuleScope};

use super::{
    BookingRepository, DeviceCatalog, PricingRuleRepository, StorageError, TechnicianDirectory,
};

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<String, Booking>>,
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn load_booking(&self, id: &BookingId) -> Result<Option<Booking>, StorageError> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(&id.0).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id.0) {
            return Err(StorageError::Duplicate { entity: "booking", id: booking.id.0.clone() });
        }
        bookings.insert(booking.id.0.clone(), booking.clone());
        Ok(())
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let mut bookings = self.bookings.write().await;
        let stored = bookings
            .get_mut(&booking.id.0)
            .ok_or_else(|| StorageError::Missing { entity: "booking", id: booking.id.0.clone() })?;

        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                entity: "booking",
                id: booking.id.0.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        if !booking.status_history().starts_with(stored.status_history()) {
            return Err(StorageError::HistoryRewrite { booking_id: booking.id.clone() });
        }

        let next_version = expected_version + 1;
        let mut updated = booking.clone();
        updated.version = next_version;
        *stored = updated;
        Ok(next_version)
    }
}

/// Rules keyed by id; the active-scope check runs under the write lock.
#[derive(Default)]
pub struct InMemoryPricingRuleRepository {
    rules: RwLock<BTreeMap<String, PricingRule>>,
}

fn active_twin<'a>(
    rules: &'a BTreeMap<String, PricingRule>,
    rule: &PricingRule,
) -> Option<&'a PricingRule> {
    if !rule.is_active {
        return None;
    }
    rules.values().find(|existing| {
        existing.id != rule.id && existing.is_active && existing.shares_scope_with(rule)
    })
}

#[async_trait::async_trait]
impl PricingRuleRepository for InMemoryPricingRuleRepository {
    async fn find_rule(&self, id: &RuleId) -> Result<Option<PricingRule>, StorageError> {
        let rules = self.rules.read().await;
        Ok(rules.get(&id.0).cloned())
    }

    async fn find_active_rules(
        &self,
        scope: &RuleScope,
        repair_type: RepairType,
        at: DateTime<Utc>,
    ) -> Result<Vec<PricingRule>, StorageError> {
        let rules = self.rules.read().await;
        Ok(rules
            .values()
            .filter(|rule| {
                &rule.scope == scope && rule.repair_type == repair_type && rule.is_selectable_at(at)
            })
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &PricingRule) -> Result<(), StorageError> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id.0) {
            return Err(StorageError::Duplicate { entity: "pricing_rule", id: rule.id.0.clone() });
        }
        if active_twin(&rules, rule).is_some() {
            return Err(StorageError::ActiveScopeConflict {
                scope: rule.scope.clone(),
                repair_type: rule.repair_type,
            });
        }
        rules.insert(rule.id.0.clone(), rule.clone());
        Ok(())
    }

    async fn save_rule(
        &self,
        rule: &PricingRule,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let mut rules = self.rules.write().await;
        let actual = rules
            .get(&rule.id.0)
            .map(|stored| stored.version)
            .ok_or_else(|| StorageError::Missing {
                entity: "pricing_rule",
                id: rule.id.0.clone(),
            })?;
        if actual != expected_version {
            return Err(StorageError::VersionConflict {
                entity: "pricing_rule",
                id: rule.id.0.clone(),
                expected: expected_version,
                actual,
            });
        }
        if active_twin(&rules, rule).is_some() {
            return Err(StorageError::ActiveScopeConflict {
                scope: rule.scope.clone(),
                repair_type: rule.repair_type,
            });
        }

        let next_version = expected_version + 1;
        rules.insert(rule.id.0.clone(), PricingRule { version: next_version, ..rule.clone() });
        Ok(next_version)
    }
}

#[derive(Default)]
pub struct InMemoryDeviceCatalog {
    devices: RwLock<HashMap<String, DeviceModel>>,
}

impl InMemoryDeviceCatalog {
    pub fn with_devices(devices: impl IntoIterator<Item = DeviceModel>) -> Self {
        let devices = devices.into_iter().map(|device| (device.id.0.clone(), device)).collect();
        Self { devices: RwLock::new(devices) }
    }

    pub async fn register(&self, device: DeviceModel) {
        self.devices.write().await.insert(device.id.0.clone(), device);
    }
}

#[async_trait::async_trait]
impl DeviceCatalog for InMemoryDeviceCatalog {
    async fn find_device(&self, id: &DeviceModelId) -> Result<Option<DeviceModel>, StorageError> {
        let devices = self.devices.read().await;
        Ok(devices.get(&id.0).cloned())
    }
}

/// Technician availability keyed by id, listed in id order.
#[derive(Default)]
pub struct InMemoryTechnicianDirectory {
    technicians: RwLock<BTreeMap<String, bool>>,
}

impl InMemoryTechnicianDirectory {
    pub fn with_available<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let technicians = ids.into_iter().map(|id| (id.to_owned(), true)).collect();
        Self { technicians: RwLock::new(technicians) }
    }

    pub async fn set_available(&self, id: &TechnicianId, is_available: bool) {
        self.technicians.write().await.insert(id.0.clone(), is_available);
    }
}

#[async_trait::async_trait]
impl TechnicianDirectory for InMemoryTechnicianDirectory {
    async fn available_technicians(&self) -> Result<Vec<TechnicianId>, StorageError> {
        let technicians = self.technicians.read().await;
        Ok(technicians
            .iter()
            .filter(|(_, available)| **available)
            .map(|(id, _)| TechnicianId(id.clone()))
            .collect())
    }
}
