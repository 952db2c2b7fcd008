//! Composes the state machine, the pricing engine and the storage and
//! notification contracts into the booking operations callers use.
//!
//! A status change is load, plan, resolve side effects, save with the
//! expected version, then notify. Once the save succeeds the change stands:
//! failures after that point are returned as warnings, never as errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::AppConfig;
use crate::domain::actor::Actor;
use crate::domain::booking::{
    Booking, BookingId, BookingStatus, NewBooking, StatusHistoryEntry, TechnicianId,
};
use crate::domain::pricing_rule::{PricingRule, RuleDraft, RuleId};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::{
    BookingStateMachine, EffectResolution, Repricing, SideEffect, TransitionOptions,
    TransitionPlan,
};
use crate::notifications::{
    NotificationError, NotificationKind, NotificationRenderer, NotificationRequest, Notifier,
    TracingNotifier,
};
use crate::ports::{BookingRepository, DeviceCatalog, PricingRuleRepository, TechnicianDirectory};
use crate::pricing::{PriceQuote, PricingEngine, QuoteRequest};
use crate::technicians::{TechnicianSelector, UniformRandomSelector};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub booking_id: BookingId,
    pub destination: BookingStatus,
    pub actor: Actor,
    #[serde(default)]
    pub options: TransitionOptions,
    pub requested_at: DateTime<Utc>,
    pub correlation_id: String,
}

impl StatusChangeRequest {
    pub fn new(
        booking_id: BookingId,
        destination: BookingStatus,
        actor: Actor,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id,
            destination,
            actor,
            options: TransitionOptions::default(),
            requested_at,
            correlation_id: new_correlation_id(),
        }
    }

    pub fn with_options(mut self, options: TransitionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    pub booking_id: BookingId,
    pub actor: Actor,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub correlation_id: String,
}

impl CancelBookingRequest {
    pub fn new(booking_id: BookingId, actor: Actor, requested_at: DateTime<Utc>) -> Self {
        Self { booking_id, actor, reason: None, requested_at, correlation_id: new_correlation_id() }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A side effect that could not be carried out after the status was saved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum SideEffectWarning {
    NoTechnicianAvailable { reason: String },
    RepricingFailed { reason: String },
    NotificationFailed { kind: NotificationKind, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChangeOutcome {
    pub booking: Booking,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub entry: StatusHistoryEntry,
    pub effects: Vec<SideEffect>,
    pub notification: Option<NotificationRequest>,
    pub warnings: Vec<SideEffectWarning>,
}

impl StatusChangeOutcome {
    pub fn notification_failed(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| matches!(warning, SideEffectWarning::NotificationFailed { .. }))
    }
}

pub struct LifecycleOrchestrator {
    machine: BookingStateMachine,
    pricing: PricingEngine,
    bookings: Arc<dyn BookingRepository>,
    technicians: Arc<dyn TechnicianDirectory>,
    selector: Arc<dyn TechnicianSelector>,
    notifier: Arc<dyn Notifier>,
    renderer: NotificationRenderer,
    audit: Arc<dyn AuditSink>,
}

impl LifecycleOrchestrator {
    pub fn new(
        machine: BookingStateMachine,
        pricing: PricingEngine,
        bookings: Arc<dyn BookingRepository>,
        technicians: Arc<dyn TechnicianDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApplicationError> {
        let renderer = NotificationRenderer::new()
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        Ok(Self {
            machine,
            pricing,
            bookings,
            technicians,
            selector: Arc::new(UniformRandomSelector),
            notifier,
            renderer,
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Wires the machine and pricing engine from loaded settings. Notifications
    /// go to the log until [`LifecycleOrchestrator::with_notifier`] replaces it.
    pub fn from_config(
        config: &AppConfig,
        rules: Arc<dyn PricingRuleRepository>,
        catalog: Arc<dyn DeviceCatalog>,
        bookings: Arc<dyn BookingRepository>,
        technicians: Arc<dyn TechnicianDirectory>,
    ) -> Result<Self, ApplicationError> {
        Self::new(
            BookingStateMachine::new(config.lifecycle_config()),
            PricingEngine::new(config.pricing.clone(), rules, catalog),
            bookings,
            technicians,
            Arc::new(TracingNotifier),
        )
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn TechnicianSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    pub async fn quote_price(
        &self,
        request: &QuoteRequest,
    ) -> Result<PriceQuote, ApplicationError> {
        self.pricing.quote(request).await
    }

    pub async fn booking(&self, booking_id: &BookingId) -> Result<Booking, ApplicationError> {
        self.bookings.load_booking(booking_id).await?.ok_or_else(|| ApplicationError::NotFound {
            entity: "booking",
            id: booking_id.0.clone(),
        })
    }

    /// Prices the request once and stores a new booking in its initial
    /// status.
    pub async fn create_booking(
        &self,
        new: NewBooking,
        now: DateTime<Utc>,
    ) -> Result<Booking, ApplicationError> {
        let quote = self
            .pricing
            .quote(&QuoteRequest::new(
                new.device_model_id.clone(),
                new.repair_type,
                new.urgency,
                now,
            ))
            .await?;

        let booking =
            Booking::open(BookingId::generate(), new, quote.base_price, quote.final_price, now)?;
        self.bookings.insert_booking(&booking).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(booking.id.clone()),
                new_correlation_id(),
                "booking.created",
                AuditCategory::Lifecycle,
                booking.customer_id.0.clone(),
                AuditOutcome::Success,
                now,
            )
            .with_metadata("final_price_minor", booking.final_price.minor_units().to_string())
            .with_metadata("rule_id", quote.rule_id.map(|id| id.0).unwrap_or_default()),
        );
        info!(
            event_name = "booking.created",
            booking_id = %booking.id,
            device_model_id = %booking.device_model_id,
            repair_type = %booking.repair_type,
            final_price_minor = booking.final_price.minor_units(),
            "booking created"
        );
        Ok(booking)
    }

    pub async fn request_status_change(
        &self,
        request: StatusChangeRequest,
    ) -> Result<StatusChangeOutcome, ApplicationError> {
        let StatusChangeRequest {
            booking_id,
            destination,
            actor,
            options,
            requested_at,
            correlation_id,
        } = request;

        self.run_transition(&booking_id, &actor, &correlation_id, requested_at, |machine, booking| {
            machine.plan(booking, destination, &actor, &options, requested_at)
        })
        .await
    }

    /// Cancellation on behalf of the booking's owner, or by staff.
    pub async fn cancel_booking(
        &self,
        request: CancelBookingRequest,
    ) -> Result<StatusChangeOutcome, ApplicationError> {
        let CancelBookingRequest { booking_id, actor, reason, requested_at, correlation_id } =
            request;

        self.run_transition(&booking_id, &actor, &correlation_id, requested_at, |machine, booking| {
            machine.plan_customer_cancel(booking, &actor, reason, requested_at)
        })
        .await
    }

    pub async fn create_rule(
        &self,
        actor: &Actor,
        draft: RuleDraft,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        self.require_admin(actor, "create pricing rules", now)?;
        let result = self.pricing.create_rule(draft, now).await;
        self.audit_rule_change(actor, "pricing.rule_created", &result, now);
        result
    }

    pub async fn activate_rule(
        &self,
        actor: &Actor,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        self.require_admin(actor, "activate pricing rules", now)?;
        let result = self.pricing.activate_rule(rule_id, now).await;
        self.audit_rule_change(actor, "pricing.rule_activated", &result, now);
        result
    }

    pub async fn deactivate_rule(
        &self,
        actor: &Actor,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> Result<PricingRule, ApplicationError> {
        self.require_admin(actor, "deactivate pricing rules", now)?;
        let result = self.pricing.deactivate_rule(rule_id, now).await;
        self.audit_rule_change(actor, "pricing.rule_deactivated", &result, now);
        result
    }

    async fn run_transition<P>(
        &self,
        booking_id: &BookingId,
        actor: &Actor,
        correlation_id: &str,
        requested_at: DateTime<Utc>,
        planner: P,
    ) -> Result<StatusChangeOutcome, ApplicationError>
    where
        P: FnOnce(&BookingStateMachine, &Booking) -> Result<TransitionPlan, DomainError> + Send,
    {
        let mut booking = self.booking(booking_id).await?;

        let plan = match planner(&self.machine, &booking) {
            Ok(plan) => plan,
            Err(error) => {
                self.audit_rejection(&booking, actor, correlation_id, &error, requested_at);
                return Err(error.into());
            }
        };

        let mut warnings = Vec::new();
        let resolution = EffectResolution {
            technician: self.resolve_technician(&booking, &plan, &mut warnings).await,
            repricing: self.resolve_repricing(&booking, &plan, &mut warnings).await,
        };

        let expected_version = booking.version;
        let entry = self.machine.apply(&mut booking, &plan, resolution)?;
        booking.version = match self.bookings.save_booking(&booking, expected_version).await {
            Ok(version) => version,
            Err(error) => {
                let error = ApplicationError::from(error);
                self.audit.emit(
                    self.transition_event(&plan, correlation_id, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                warn!(
                    event_name = "booking.transition_failed",
                    booking_id = %plan.booking_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "booking status change was not saved"
                );
                return Err(error);
            }
        };

        self.audit.emit(
            self.transition_event(&plan, correlation_id, AuditOutcome::Success)
                .with_metadata("version", booking.version.to_string()),
        );
        info!(
            event_name = "booking.transition_applied",
            booking_id = %booking.id,
            correlation_id = %correlation_id,
            from = %plan.from,
            to = %plan.to,
            actor = %plan.actor.id,
            version = booking.version,
            "booking status changed"
        );

        let notification = self.notify(&booking, &plan, correlation_id, &mut warnings).await;

        Ok(StatusChangeOutcome {
            from: plan.from,
            to: plan.to,
            entry,
            effects: plan.effects,
            notification,
            warnings,
            booking,
        })
    }

    async fn resolve_technician(
        &self,
        booking: &Booking,
        plan: &TransitionPlan,
        warnings: &mut Vec<SideEffectWarning>,
    ) -> Option<TechnicianId> {
        let preferred = plan.assignment()?;
        if let Some(technician) = preferred {
            return Some(technician.clone());
        }

        let candidates = match self.technicians.available_technicians().await {
            Ok(candidates) => candidates,
            Err(error) => {
                warnings.push(SideEffectWarning::NoTechnicianAvailable {
                    reason: format!("technician directory unavailable: {error}"),
                });
                return None;
            }
        };

        let chosen = self.selector.select(booking, &candidates);
        if chosen.is_none() {
            warn!(
                event_name = "booking.no_technician_available",
                booking_id = %booking.id,
                "confirmed without an assigned technician"
            );
            warnings.push(SideEffectWarning::NoTechnicianAvailable {
                reason: "no technician is currently available".to_owned(),
            });
        }
        chosen
    }

    async fn resolve_repricing(
        &self,
        booking: &Booking,
        plan: &TransitionPlan,
        warnings: &mut Vec<SideEffectWarning>,
    ) -> Option<Repricing> {
        let urgency = plan.reprice_urgency()?;
        let request = QuoteRequest::new(
            booking.device_model_id.clone(),
            booking.repair_type,
            urgency,
            plan.at,
        );

        match self.pricing.quote(&request).await {
            Ok(quote) => Some(Repricing {
                urgency,
                base_price: quote.base_price,
                final_price: quote.final_price,
            }),
            Err(error) => {
                warn!(
                    event_name = "booking.repricing_failed",
                    booking_id = %booking.id,
                    error = %error,
                    "keeping the previous price"
                );
                warnings.push(SideEffectWarning::RepricingFailed { reason: error.to_string() });
                None
            }
        }
    }

    async fn notify(
        &self,
        booking: &Booking,
        plan: &TransitionPlan,
        correlation_id: &str,
        warnings: &mut Vec<SideEffectWarning>,
    ) -> Option<NotificationRequest> {
        let kind = plan.notification()?;
        let delivery = match self.renderer.render(booking, plan.from, &plan.note) {
            Ok(Some(request)) => {
                self.notifier.emit(request.clone()).await.map(|()| request)
            }
            Ok(None) => return None,
            Err(error) => Err(error),
        };

        match delivery {
            Ok(request) => Some(request),
            Err(error) => {
                self.record_notification_failure(booking, kind, correlation_id, &error, plan.at);
                warnings.push(SideEffectWarning::NotificationFailed {
                    kind,
                    reason: error.to_string(),
                });
                None
            }
        }
    }

    fn record_notification_failure(
        &self,
        booking: &Booking,
        kind: NotificationKind,
        correlation_id: &str,
        error: &NotificationError,
        at: DateTime<Utc>,
    ) {
        warn!(
            event_name = "booking.notification_failed",
            booking_id = %booking.id,
            correlation_id = %correlation_id,
            kind = kind.as_str(),
            error = %error,
            "status change saved but notification was not delivered"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(booking.id.clone()),
                correlation_id,
                "notification.failed",
                AuditCategory::Notification,
                "lifecycle-orchestrator",
                AuditOutcome::Failed,
                at,
            )
            .with_metadata("kind", kind.as_str())
            .with_metadata("error", error.to_string()),
        );
    }

    fn transition_event(
        &self,
        plan: &TransitionPlan,
        correlation_id: &str,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        let event_type = match outcome {
            AuditOutcome::Success => "booking.transition_applied",
            AuditOutcome::Rejected | AuditOutcome::Failed => "booking.transition_failed",
        };
        AuditEvent::new(
            Some(plan.booking_id.clone()),
            correlation_id,
            event_type,
            AuditCategory::Lifecycle,
            plan.actor.id.clone(),
            outcome,
            plan.at,
        )
        .with_metadata("from", plan.from.as_str())
        .with_metadata("to", plan.to.as_str())
        .with_metadata("role", plan.actor.role.as_str())
    }

    fn audit_rejection(
        &self,
        booking: &Booking,
        actor: &Actor,
        correlation_id: &str,
        error: &DomainError,
        at: DateTime<Utc>,
    ) {
        let category = match error {
            DomainError::Forbidden { .. } => AuditCategory::Authorization,
            _ => AuditCategory::Lifecycle,
        };
        info!(
            event_name = "booking.transition_rejected",
            booking_id = %booking.id,
            correlation_id = %correlation_id,
            actor = %actor.id,
            error = %error,
            "booking status change rejected"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(booking.id.clone()),
                correlation_id,
                "booking.transition_rejected",
                category,
                actor.id.clone(),
                AuditOutcome::Rejected,
                at,
            )
            .with_metadata("from", booking.status().as_str())
            .with_metadata("role", actor.role.as_str())
            .with_metadata("error", error.to_string()),
        );
    }

    fn require_admin(
        &self,
        actor: &Actor,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        if actor.role.is_admin() {
            return Ok(());
        }

        let error = DomainError::Forbidden {
            actor_id: actor.id.clone(),
            role: actor.role,
            action: action.to_owned(),
        };
        self.audit.emit(
            AuditEvent::new(
                None,
                new_correlation_id(),
                "pricing.rule_change_rejected",
                AuditCategory::Authorization,
                actor.id.clone(),
                AuditOutcome::Rejected,
                at,
            )
            .with_metadata("error", error.to_string()),
        );
        Err(error.into())
    }

    fn audit_rule_change(
        &self,
        actor: &Actor,
        event_type: &str,
        result: &Result<PricingRule, ApplicationError>,
        at: DateTime<Utc>,
    ) {
        let event = match result {
            Ok(rule) => AuditEvent::new(
                None,
                new_correlation_id(),
                event_type,
                AuditCategory::Pricing,
                actor.id.clone(),
                AuditOutcome::Success,
                at,
            )
            .with_metadata("rule_id", rule.id.0.clone())
            .with_metadata("version", rule.version.to_string()),
            Err(error) => AuditEvent::new(
                None,
                new_correlation_id(),
                event_type,
                AuditCategory::Pricing,
                actor.id.clone(),
                AuditOutcome::Rejected,
                at,
            )
            .with_metadata("error", error.to_string()),
        };
        self.audit.emit(event);
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        CancelBookingRequest, LifecycleOrchestrator, SideEffectWarning, StatusChangeRequest,
    };
    use crate::audit::{AuditOutcome, InMemoryAuditSink};
    use crate::domain::actor::{Actor, Role};
    use crate::domain::booking::{
        Booking, BookingId, BookingStatus, CustomerId, NewBooking, RepairType, TechnicianId,
        UrgencyLevel,
    };
    use crate::domain::device::DeviceModelId;
    use crate::domain::pricing_rule::{PricingFactors, RuleDraft, RuleScope};
    use crate::errors::{ApplicationError, DomainError};
    use crate::ports::{BookingRepository, StorageError};
    use crate::lifecycle::{BookingStateMachine, TransitionOptions};
    use crate::money::{Factor, Money};
    use crate::notifications::{InMemoryNotifier, NotificationKind};
    use crate::pricing::{PricingConfig, PricingEngine};
    use crate::technicians::FirstAvailableSelector;
    use crate::test_support::{FakeBookings, FakeCatalog, FakeRules, FakeTechnicians};

    struct Harness {
        orchestrator: LifecycleOrchestrator,
        bookings: Arc<FakeBookings>,
        notifier: InMemoryNotifier,
        audit: InMemoryAuditSink,
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn harness(technicians: FakeTechnicians) -> Harness {
        let bookings = Arc::new(FakeBookings::default());
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let pricing = PricingEngine::new(
            PricingConfig::default(),
            Arc::new(FakeRules::default()),
            Arc::new(FakeCatalog::with_devices(["iphone-13"])),
        );
        let orchestrator = LifecycleOrchestrator::new(
            BookingStateMachine::default(),
            pricing,
            bookings.clone(),
            Arc::new(technicians),
            Arc::new(notifier.clone()),
        )
        .expect("orchestrator")
        .with_selector(Arc::new(FirstAvailableSelector))
        .with_audit_sink(Arc::new(audit.clone()));

        Harness { orchestrator, bookings, notifier, audit }
    }

    fn new_booking() -> NewBooking {
        NewBooking {
            customer_id: CustomerId("cust-1".to_owned()),
            device_model_id: DeviceModelId("iphone-13".to_owned()),
            repair_type: RepairType::ScreenRepair,
            urgency: UrgencyLevel::Standard,
            scheduled_date: None,
            estimated_completion: None,
        }
    }

    fn technician() -> Actor {
        Actor::new("tech-1", Role::Technician)
    }

    #[tokio::test]
    async fn confirmation_assigns_saves_and_notifies() {
        let h = harness(FakeTechnicians::with(["tech-7", "tech-8"]));
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");
        assert_eq!(booking.final_price, Money::from_major(120));

        let outcome = h
            .orchestrator
            .request_status_change(StatusChangeRequest::new(
                booking.id.clone(),
                BookingStatus::Confirmed,
                technician(),
                now() + Duration::minutes(5),
            ))
            .await
            .expect("confirm");

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.booking.assigned_technician_id, Some(TechnicianId("tech-7".to_owned())));
        assert_eq!(outcome.booking.version, 2);

        let stored = h.bookings.stored(&booking.id).expect("stored");
        assert_eq!(stored.status(), BookingStatus::Confirmed);
        assert_eq!(stored.status_history().len(), 1);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::BookingConfirmed);
        assert_eq!(sent[0].user_id, CustomerId("cust-1".to_owned()));
    }

    #[tokio::test]
    async fn notifier_failure_keeps_the_transition() {
        let h = harness(FakeTechnicians::with(["tech-7"]));
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");
        h.notifier.set_failing(true);

        let outcome = h
            .orchestrator
            .request_status_change(StatusChangeRequest::new(
                booking.id.clone(),
                BookingStatus::Cancelled,
                technician(),
                now(),
            ))
            .await
            .expect("cancel still commits");

        assert!(outcome.notification_failed());
        assert!(outcome.notification.is_none());
        assert_eq!(
            h.bookings.stored(&booking.id).map(|stored| stored.status()),
            Some(BookingStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn confirmation_without_technicians_warns() {
        let h = harness(FakeTechnicians::default());
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");

        let outcome = h
            .orchestrator
            .request_status_change(StatusChangeRequest::new(
                booking.id,
                BookingStatus::Confirmed,
                technician(),
                now(),
            ))
            .await
            .expect("confirm");

        assert_eq!(outcome.booking.status(), BookingStatus::Confirmed);
        assert!(outcome.booking.assigned_technician_id.is_none());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [SideEffectWarning::NoTechnicianAvailable { .. }]
        ));
    }

    /// Lets another writer slip in between load and save.
    struct RacingBookings(Arc<FakeBookings>);

    #[async_trait]
    impl BookingRepository for RacingBookings {
        async fn load_booking(&self, id: &BookingId) -> Result<Option<Booking>, StorageError> {
            let loaded = self.0.load_booking(id).await;
            self.0.bump_version(id);
            loaded
        }

        async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
            self.0.insert_booking(booking).await
        }

        async fn save_booking(
            &self,
            booking: &Booking,
            expected_version: u32,
        ) -> Result<u32, StorageError> {
            self.0.save_booking(booking, expected_version).await
        }
    }

    #[tokio::test]
    async fn concurrent_write_surfaces_version_conflict() {
        let h = harness(FakeTechnicians::with(["tech-7"]));
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");
        let racing = LifecycleOrchestrator::new(
            BookingStateMachine::default(),
            h.orchestrator.pricing().clone(),
            Arc::new(RacingBookings(h.bookings.clone())),
            Arc::new(FakeTechnicians::with(["tech-7"])),
            Arc::new(h.notifier.clone()),
        )
        .expect("orchestrator");
        let audit = InMemoryAuditSink::default();
        let racing = racing.with_audit_sink(Arc::new(audit.clone()));

        let error = racing
            .request_status_change(StatusChangeRequest::new(
                booking.id.clone(),
                BookingStatus::Confirmed,
                technician(),
                now(),
            ))
            .await
            .expect_err("stale version");

        assert!(matches!(
            error,
            ApplicationError::VersionConflict { expected: 1, actual: 2, .. }
        ));
        let stored = h.bookings.stored(&booking.id).expect("stored");
        assert_eq!(stored.status(), BookingStatus::Pending);
        assert!(h.notifier.sent().is_empty());

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "booking.transition_failed");
        assert_eq!(events[0].outcome, AuditOutcome::Failed);
        assert!(events[0].metadata.contains_key("error"));
    }

    #[tokio::test]
    async fn rejected_transition_is_audited_and_unchanged() {
        let h = harness(FakeTechnicians::default());
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");

        let error = h
            .orchestrator
            .request_status_change(
                StatusChangeRequest::new(
                    booking.id.clone(),
                    BookingStatus::Completed,
                    technician(),
                    now(),
                )
                .with_correlation_id("req-77"),
            )
            .await
            .expect_err("pending cannot complete");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::IllegalTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            })
        ));
        let stored = h.bookings.stored(&booking.id).expect("stored");
        assert_eq!(stored.status(), BookingStatus::Pending);
        assert_eq!(stored.version, 1);

        let rejected: Vec<_> = h
            .audit
            .events()
            .into_iter()
            .filter(|event| event.outcome == AuditOutcome::Rejected)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].correlation_id, "req-77");
    }

    #[tokio::test]
    async fn urgency_escalation_reprices_the_booking() {
        let h = harness(FakeTechnicians::with(["tech-7"]));
        let admin = Actor::new("admin-1", Role::Admin);
        h.orchestrator
            .create_rule(
                &admin,
                RuleDraft {
                    scope: RuleScope::Specific(DeviceModelId("iphone-13".to_owned())),
                    repair_type: RepairType::ScreenRepair,
                    base_price: Money::from_major(200),
                    factors: PricingFactors {
                        urgency_multiplier: Some(Factor::from_parts(15, 1)),
                        ..PricingFactors::default()
                    },
                    valid_from: None,
                    valid_until: None,
                    is_active: true,
                },
                now(),
            )
            .await
            .expect("rule");
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");
        assert_eq!(booking.final_price, Money::from_major(200));

        let outcome = h
            .orchestrator
            .request_status_change(
                StatusChangeRequest::new(
                    booking.id,
                    BookingStatus::Confirmed,
                    technician(),
                    now(),
                )
                .with_options(TransitionOptions {
                    urgency: Some(UrgencyLevel::Urgent),
                    ..TransitionOptions::default()
                }),
            )
            .await
            .expect("confirm");

        assert_eq!(outcome.booking.final_price, Money::from_major(300));
        assert_eq!(outcome.booking.urgency, UrgencyLevel::Urgent);
    }

    #[tokio::test]
    async fn rule_administration_requires_an_admin() {
        let h = harness(FakeTechnicians::default());
        let draft = RuleDraft {
            scope: RuleScope::Generic,
            repair_type: RepairType::BatteryReplacement,
            base_price: Money::from_major(90),
            factors: PricingFactors::default(),
            valid_from: None,
            valid_until: None,
            is_active: true,
        };

        let error = h
            .orchestrator
            .create_rule(&technician(), draft, now())
            .await
            .expect_err("technicians cannot manage rules");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn owner_cancels_a_pending_booking() {
        let h = harness(FakeTechnicians::default());
        let booking = h.orchestrator.create_booking(new_booking(), now()).await.expect("create");

        let outcome = h
            .orchestrator
            .cancel_booking(
                CancelBookingRequest::new(
                    booking.id,
                    Actor::new("cust-1", Role::Customer),
                    now(),
                )
                .with_reason("found a cheaper repair"),
            )
            .await
            .expect("cancel");

        assert_eq!(outcome.to, BookingStatus::Cancelled);
        assert_eq!(outcome.entry.note, "found a cheaper repair");
        assert_eq!(outcome.entry.changed_by, "cust-1");
    }
}
