//! Minimal storage fakes for unit tests inside this crate. The full
//! in-memory repositories live in `repairdesk-db`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::booking::{Booking, BookingId, RepairType, TechnicianId};
use crate::domain::device::{DeviceCategory, DeviceModel, DeviceModelId};
use crate::domain::pricing_rule::{PricingRule, RuleId, RuleScope};
use crate::ports::{
    BookingRepository, DeviceCatalog, PricingRuleRepository, StorageError, TechnicianDirectory,
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
pub struct FakeRules {
    rules: Mutex<Vec<PricingRule>>,
}

impl FakeRules {
    pub fn snapshot(&self) -> Vec<PricingRule> {
        locked(&self.rules).clone()
    }
}

#[async_trait]
impl PricingRuleRepository for FakeRules {
    async fn find_rule(&self, id: &RuleId) -> Result<Option<PricingRule>, StorageError> {
        Ok(locked(&self.rules).iter().find(|rule| &rule.id == id).cloned())
    }

    async fn find_active_rules(
        &self,
        scope: &RuleScope,
        repair_type: RepairType,
        at: DateTime<Utc>,
    ) -> Result<Vec<PricingRule>, StorageError> {
        Ok(locked(&self.rules)
            .iter()
            .filter(|rule| {
                &rule.scope == scope && rule.repair_type == repair_type && rule.is_selectable_at(at)
            })
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &PricingRule) -> Result<(), StorageError> {
        let mut rules = locked(&self.rules);
        if rules.iter().any(|existing| existing.id == rule.id) {
            return Err(StorageError::Duplicate { entity: "pricing_rule", id: rule.id.0.clone() });
        }
        if rule.is_active
            && rules.iter().any(|existing| existing.is_active && existing.shares_scope_with(rule))
        {
            return Err(StorageError::ActiveScopeConflict {
                scope: rule.scope.clone(),
                repair_type: rule.repair_type,
            });
        }
        rules.push(rule.clone());
        Ok(())
    }

    async fn save_rule(
        &self,
        rule: &PricingRule,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let mut rules = locked(&self.rules);
        if rule.is_active
            && rules.iter().any(|existing| {
                existing.id != rule.id && existing.is_active && existing.shares_scope_with(rule)
            })
        {
            return Err(StorageError::ActiveScopeConflict {
                scope: rule.scope.clone(),
                repair_type: rule.repair_type,
            });
        }
        let stored = rules
            .iter_mut()
            .find(|existing| existing.id == rule.id)
            .ok_or_else(|| StorageError::Missing {
                entity: "pricing_rule",
                id: rule.id.0.clone(),
            })?;
        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                entity: "pricing_rule",
                id: rule.id.0.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        *stored = PricingRule { version: expected_version + 1, ..rule.clone() };
        Ok(expected_version + 1)
    }
}

pub struct FakeCatalog {
    devices: Vec<DeviceModel>,
}

impl FakeCatalog {
    pub fn with_devices<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let devices = ids
            .into_iter()
            .map(|id| DeviceModel {
                id: DeviceModelId(id.to_owned()),
                brand: "Acme".to_owned(),
                name: id.to_owned(),
                category: DeviceCategory::Smartphone,
            })
            .collect();
        Self { devices }
    }
}

#[async_trait]
impl DeviceCatalog for FakeCatalog {
    async fn find_device(&self, id: &DeviceModelId) -> Result<Option<DeviceModel>, StorageError> {
        Ok(self.devices.iter().find(|device| &device.id == id).cloned())
    }
}

#[derive(Default)]
pub struct FakeBookings {
    bookings: Mutex<HashMap<BookingId, Booking>>,
}

impl FakeBookings {
    pub fn stored(&self, id: &BookingId) -> Option<Booking> {
        locked(&self.bookings).get(id).cloned()
    }

    /// Simulates a concurrent writer by bumping the stored version.
    pub fn bump_version(&self, id: &BookingId) {
        if let Some(booking) = locked(&self.bookings).get_mut(id) {
            booking.version += 1;
        }
    }
}

#[async_trait]
impl BookingRepository for FakeBookings {
    async fn load_booking(&self, id: &BookingId) -> Result<Option<Booking>, StorageError> {
        Ok(locked(&self.bookings).get(id).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        let mut bookings = locked(&self.bookings);
        if bookings.contains_key(&booking.id) {
            return Err(StorageError::Duplicate { entity: "booking", id: booking.id.0.clone() });
        }
        bookings.insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: u32,
    ) -> Result<u32, StorageError> {
        let mut bookings = locked(&self.bookings);
        let stored = bookings
            .get_mut(&booking.id)
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
        let mut updated = booking.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(expected_version + 1)
    }
}

#[derive(Default)]
pub struct FakeTechnicians {
    pub available: Vec<TechnicianId>,
}

impl FakeTechnicians {
    pub fn with<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self { available: ids.into_iter().map(|id| TechnicianId(id.to_owned())).collect() }
    }
}

#[async_trait]
impl TechnicianDirectory for FakeTechnicians {
    async fn available_technicians(&self) -> Result<Vec<TechnicianId>, StorageError> {
        Ok(self.available.clone())
    }
}
