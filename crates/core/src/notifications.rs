//! Booking notifications: what is sent on each status change and the
//! [`Notifier`] contract that delivers it.
//!
//! Delivery itself (email, push) happens outside the core. The renderer only
//! turns a committed transition into a [`NotificationRequest`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::info;

use crate::domain::booking::{Booking, BookingId, BookingStatus, CustomerId, TechnicianId};
use crate::money::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    RepairStarted,
    WaitingParts,
    ApprovalNeeded,
    RepairCompleted,
    BookingCancelled,
    BookingRefunded,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 7] = [
        Self::BookingConfirmed,
        Self::RepairStarted,
        Self::WaitingParts,
        Self::ApprovalNeeded,
        Self::RepairCompleted,
        Self::BookingCancelled,
        Self::BookingRefunded,
    ];

    /// The notification sent when a booking enters `status`, if any.
    pub fn for_destination(status: BookingStatus) -> Option<Self> {
        match status {
            BookingStatus::Pending => None,
            BookingStatus::Confirmed => Some(Self::BookingConfirmed),
            BookingStatus::InProgress => Some(Self::RepairStarted),
            BookingStatus::WaitingParts => Some(Self::WaitingParts),
            BookingStatus::WaitingApproval => Some(Self::ApprovalNeeded),
            BookingStatus::Completed => Some(Self::RepairCompleted),
            BookingStatus::Cancelled => Some(Self::BookingCancelled),
            BookingStatus::Refunded => Some(Self::BookingRefunded),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingConfirmed => "booking_confirmed",
            Self::RepairStarted => "repair_started",
            Self::WaitingParts => "waiting_parts",
            Self::ApprovalNeeded => "approval_needed",
            Self::RepairCompleted => "repair_completed",
            Self::BookingCancelled => "booking_cancelled",
            Self::BookingRefunded => "booking_refunded",
        }
    }

    fn title_template(&self) -> String {
        format!("{}.title", self.as_str())
    }

    fn body_template(&self) -> String {
        format!("{}.body", self.as_str())
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
}

pub const BOOKING_CHANNELS: [NotificationChannel; 2] =
    [NotificationChannel::Email, NotificationChannel::InApp];

/// Structured data attached to a notification, one shape per kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    BookingConfirmed {
        technician_id: Option<TechnicianId>,
        scheduled_date: Option<DateTime<Utc>>,
        final_price: Money,
    },
    RepairStarted {
        technician_id: Option<TechnicianId>,
        estimated_completion: Option<DateTime<Utc>>,
    },
    WaitingParts {
        note: String,
    },
    ApprovalNeeded {
        final_price: Money,
        note: String,
    },
    RepairCompleted {
        completed_at: Option<DateTime<Utc>>,
        final_price: Money,
    },
    BookingCancelled {
        previous_status: BookingStatus,
        reason: String,
    },
    BookingRefunded {
        refunded_amount: Money,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::BookingConfirmed { .. } => NotificationKind::BookingConfirmed,
            Self::RepairStarted { .. } => NotificationKind::RepairStarted,
            Self::WaitingParts { .. } => NotificationKind::WaitingParts,
            Self::ApprovalNeeded { .. } => NotificationKind::ApprovalNeeded,
            Self::RepairCompleted { .. } => NotificationKind::RepairCompleted,
            Self::BookingCancelled { .. } => NotificationKind::BookingCancelled,
            Self::BookingRefunded { .. } => NotificationKind::BookingRefunded,
        }
    }

    /// Builds the payload for `kind` from a booking that already holds the
    /// new status.
    pub fn describe(
        kind: NotificationKind,
        booking: &Booking,
        previous_status: BookingStatus,
        note: &str,
    ) -> Self {
        match kind {
            NotificationKind::BookingConfirmed => Self::BookingConfirmed {
                technician_id: booking.assigned_technician_id.clone(),
                scheduled_date: booking.scheduled_date,
                final_price: booking.final_price,
            },
            NotificationKind::RepairStarted => Self::RepairStarted {
                technician_id: booking.assigned_technician_id.clone(),
                estimated_completion: booking.estimated_completion,
            },
            NotificationKind::WaitingParts => Self::WaitingParts { note: note.to_owned() },
            NotificationKind::ApprovalNeeded => {
                Self::ApprovalNeeded { final_price: booking.final_price, note: note.to_owned() }
            }
            NotificationKind::RepairCompleted => Self::RepairCompleted {
                completed_at: booking.completed_at,
                final_price: booking.final_price,
            },
            NotificationKind::BookingCancelled => {
                Self::BookingCancelled { previous_status, reason: note.to_owned() }
            }
            NotificationKind::BookingRefunded => {
                Self::BookingRefunded { refunded_amount: booking.final_price }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: CustomerId,
    pub booking_id: BookingId,
    pub kind: NotificationKind,
    pub channels: Vec<NotificationChannel>,
    pub title: String,
    pub body: String,
    pub previous_status: BookingStatus,
    pub status: BookingStatus,
    pub payload: NotificationPayload,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification template error: {0}")]
    Template(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, request: NotificationRequest) -> Result<(), NotificationError>;
}

const TEMPLATES: [(NotificationKind, &str, &str); 7] = [
    (
        NotificationKind::BookingConfirmed,
        "Booking {{ booking_id }} confirmed",
        "Your {{ repair_type }} booking for {{ device_model_id }} is confirmed.\
{% if technician_id %} Technician {{ technician_id }} has been assigned.{% endif %} \
Quoted price: {{ final_price }}.",
    ),
    (
        NotificationKind::RepairStarted,
        "Repair started on booking {{ booking_id }}",
        "Work on your {{ device_model_id }} has started.\
{% if estimated_completion %} Estimated completion: {{ estimated_completion }}.{% endif %}",
    ),
    (
        NotificationKind::WaitingParts,
        "Booking {{ booking_id }} is waiting for parts",
        "We are waiting for parts to continue your {{ repair_type }}. {{ note }}",
    ),
    (
        NotificationKind::ApprovalNeeded,
        "Approval needed for booking {{ booking_id }}",
        "Please review and approve the repair of your {{ device_model_id }} \
at {{ final_price }}. {{ note }}",
    ),
    (
        NotificationKind::RepairCompleted,
        "Repair completed for booking {{ booking_id }}",
        "Your {{ device_model_id }} is ready for collection. Final price: {{ final_price }}.",
    ),
    (
        NotificationKind::BookingCancelled,
        "Booking {{ booking_id }} cancelled",
        "Your booking was cancelled while {{ previous_status }}. {{ note }}",
    ),
    (
        NotificationKind::BookingRefunded,
        "Booking {{ booking_id }} refunded",
        "A refund of {{ final_price }} has been issued for your {{ repair_type }}.",
    ),
];

/// Renders notification titles and bodies from embedded `tera` templates.
#[derive(Clone, Debug)]
pub struct NotificationRenderer {
    tera: Tera,
}

impl NotificationRenderer {
    pub fn new() -> Result<Self, NotificationError> {
        let mut tera = Tera::default();
        for (kind, title, body) in TEMPLATES {
            tera.add_raw_template(&kind.title_template(), title)
                .map_err(|error| NotificationError::Template(error.to_string()))?;
            tera.add_raw_template(&kind.body_template(), body)
                .map_err(|error| NotificationError::Template(error.to_string()))?;
        }
        Ok(Self { tera })
    }

    /// Renders the notification for a booking that has just moved from
    /// `previous_status` to its current status.
    pub fn render(
        &self,
        booking: &Booking,
        previous_status: BookingStatus,
        note: &str,
    ) -> Result<Option<NotificationRequest>, NotificationError> {
        let Some(kind) = NotificationKind::for_destination(booking.status()) else {
            return Ok(None);
        };

        let mut context = Context::new();
        context.insert("booking_id", &booking.id.0);
        context.insert("device_model_id", &booking.device_model_id.0);
        context.insert("repair_type", booking.repair_type.as_str());
        context.insert("previous_status", previous_status.as_str());
        context.insert("status", booking.status().as_str());
        context.insert("final_price", &booking.final_price.to_string());
        context.insert("note", note);
        context.insert(
            "technician_id",
            &booking.assigned_technician_id.as_ref().map(|id| id.0.clone()),
        );
        context.insert(
            "estimated_completion",
            &booking.estimated_completion.map(|at| at.to_rfc3339()),
        );

        let title = self
            .tera
            .render(&kind.title_template(), &context)
            .map_err(|error| NotificationError::Template(error.to_string()))?;
        let body = self
            .tera
            .render(&kind.body_template(), &context)
            .map_err(|error| NotificationError::Template(error.to_string()))?;

        Ok(Some(NotificationRequest {
            user_id: booking.customer_id.clone(),
            booking_id: booking.id.clone(),
            kind,
            channels: BOOKING_CHANNELS.to_vec(),
            title,
            body: body.trim().to_owned(),
            previous_status,
            status: booking.status(),
            payload: NotificationPayload::describe(kind, booking, previous_status, note),
        }))
    }
}

/// Records notifications instead of delivering them.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<NotificationRequest>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<NotificationRequest> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes every following `emit` fail with a delivery error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn emit(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery(format!(
                "notifier offline, dropped {} for booking {}",
                request.kind, request.booking_id
            )));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        Ok(())
    }
}

/// Logs each notification; used when no delivery service is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        info!(
            event_name = "notification.emitted",
            booking_id = %request.booking_id,
            user_id = %request.user_id,
            kind = request.kind.as_str(),
            title = %request.title,
            "booking notification emitted"
        );
        Ok(())
    }
}
