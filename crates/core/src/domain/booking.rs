use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::device::DeviceModelId;
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(format!("BK-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TechnicianId(pub String);

impl fmt::Display for TechnicianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    WaitingParts,
    WaitingApproval,
    Completed,
    Cancelled,
    Refunded,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        Self::Pending,
        Self::Confirmed,
        Self::InProgress,
        Self::WaitingParts,
        Self::WaitingApproval,
        Self::Completed,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::InProgress => "IN_PROGRESS",
            Self::WaitingParts => "WAITING_PARTS",
            Self::WaitingApproval => "WAITING_APPROVAL",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "IN_PROGRESS" => Some(Self::InProgress),
            "WAITING_PARTS" => Some(Self::WaitingParts),
            "WAITING_APPROVAL" => Some(Self::WaitingApproval),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairType {
    ScreenRepair,
    BatteryReplacement,
    WaterDamage,
    AudioRepair,
    ChargingPort,
    SoftwareIssue,
    DataRecovery,
    Diagnostic,
    Other,
}

impl RepairType {
    pub const ALL: [RepairType; 9] = [
        Self::ScreenRepair,
        Self::BatteryReplacement,
        Self::WaterDamage,
        Self::AudioRepair,
        Self::ChargingPort,
        Self::SoftwareIssue,
        Self::DataRecovery,
        Self::Diagnostic,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScreenRepair => "screen_repair",
            Self::BatteryReplacement => "battery_replacement",
            Self::WaterDamage => "water_damage",
            Self::AudioRepair => "audio_repair",
            Self::ChargingPort => "charging_port",
            Self::SoftwareIssue => "software_issue",
            Self::DataRecovery => "data_recovery",
            Self::Diagnostic => "diagnostic",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|repair_type| repair_type.as_str() == normalized)
    }
}

impl fmt::Display for RepairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Standard,
    Urgent,
    Emergency,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "urgent" => Some(Self::Urgent),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }

    /// Urgent and emergency requests carry a surcharge and a short quote expiry.
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::Standard)
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub note: String,
}

/// Input for opening a new booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub customer_id: CustomerId,
    pub device_model_id: DeviceModelId,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Every persisted field of a booking, used to hydrate one from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub id: BookingId,
    pub status: BookingStatus,
    pub customer_id: CustomerId,
    pub device_model_id: DeviceModelId,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub base_price: Money,
    pub final_price: Money,
    pub assigned_technician_id: Option<TechnicianId>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A repair booking.
///
/// `status` and `status_history` are only reachable through accessors; the
/// lifecycle state machine is the single writer, so the current status always
/// matches the last history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub id: BookingId,
    pub customer_id: CustomerId,
    pub device_model_id: DeviceModelId,
    pub repair_type: RepairType,
    pub urgency: UrgencyLevel,
    pub base_price: Money,
    pub final_price: Money,
    pub assigned_technician_id: Option<TechnicianId>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by storage on every save.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    status: BookingStatus,
    status_history: Vec<StatusHistoryEntry>,
}

impl Booking {
    pub const INITIAL_STATUS: BookingStatus = BookingStatus::Pending;
    pub const INITIAL_VERSION: u32 = 1;

    pub fn open(
        id: BookingId,
        new: NewBooking,
        base_price: Money,
        final_price: Money,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        check_schedule(new.scheduled_date, new.estimated_completion, "estimated_completion")?;

        Ok(Self {
            id,
            customer_id: new.customer_id,
            device_model_id: new.device_model_id,
            repair_type: new.repair_type,
            urgency: new.urgency,
            base_price,
            final_price,
            assigned_technician_id: None,
            scheduled_date: new.scheduled_date,
            estimated_completion: new.estimated_completion,
            completed_at: None,
            version: Self::INITIAL_VERSION,
            created_at: now,
            updated_at: now,
            status: Self::INITIAL_STATUS,
            status_history: Vec::new(),
        })
    }

    pub fn rehydrate(snapshot: BookingSnapshot) -> Result<Self, DomainError> {
        let expected =
            snapshot.status_history.last().map(|entry| entry.to).unwrap_or(Self::INITIAL_STATUS);
        if expected != snapshot.status {
            return Err(DomainError::InvariantViolation(format!(
                "booking {} has status {} but its history ends at {expected}",
                snapshot.id, snapshot.status
            )));
        }

        let mut previous = Self::INITIAL_STATUS;
        for entry in &snapshot.status_history {
            if entry.from != previous {
                return Err(DomainError::InvariantViolation(format!(
                    "booking {} history is not contiguous at {} -> {}",
                    snapshot.id, entry.from, entry.to
                )));
            }
            previous = entry.to;
        }

        check_schedule(snapshot.scheduled_date, snapshot.completed_at, "completed_at")?;

        Ok(Self {
            id: snapshot.id,
            customer_id: snapshot.customer_id,
            device_model_id: snapshot.device_model_id,
            repair_type: snapshot.repair_type,
            urgency: snapshot.urgency,
            base_price: snapshot.base_price,
            final_price: snapshot.final_price,
            assigned_technician_id: snapshot.assigned_technician_id,
            scheduled_date: snapshot.scheduled_date,
            estimated_completion: snapshot.estimated_completion,
            completed_at: snapshot.completed_at,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            status: snapshot.status,
            status_history: snapshot.status_history,
        })
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    pub fn snapshot(&self) -> BookingSnapshot {
        BookingSnapshot {
            id: self.id.clone(),
            status: self.status,
            customer_id: self.customer_id.clone(),
            device_model_id: self.device_model_id.clone(),
            repair_type: self.repair_type,
            urgency: self.urgency,
            base_price: self.base_price,
            final_price: self.final_price,
            assigned_technician_id: self.assigned_technician_id.clone(),
            scheduled_date: self.scheduled_date,
            estimated_completion: self.estimated_completion,
            completed_at: self.completed_at,
            status_history: self.status_history.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn record_transition(&mut self, entry: StatusHistoryEntry) {
        self.status = entry.to;
        self.updated_at = entry.changed_at;
        self.status_history.push(entry);
    }
}

fn check_schedule(
    scheduled_date: Option<DateTime<Utc>>,
    later: Option<DateTime<Utc>>,
    field: &str,
) -> Result<(), DomainError> {
    match (scheduled_date, later) {
        (Some(scheduled), Some(later)) if later < scheduled => {
            Err(DomainError::InvariantViolation(format!(
                "{field} {later} precedes scheduled_date {scheduled}"
            )))
        }
        _ => Ok(()),
    }
}
