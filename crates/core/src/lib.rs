pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod money;
pub mod notifications;
pub mod orchestrator;
pub mod ports;
pub mod pricing;
pub mod technicians;

#[cfg(test)]
mod test_support;

pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use domain::actor::{Actor, Role};
pub use domain::booking::{
    Booking, BookingId, BookingSnapshot, BookingStatus, CustomerId, NewBooking, RepairType,
    StatusHistoryEntry, TechnicianId, UrgencyLevel,
};
pub use domain::device::{DeviceCategory, DeviceModel, DeviceModelId};
pub use domain::pricing_rule::{PricingFactors, PricingRule, RuleDraft, RuleId, RuleScope};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use lifecycle::{BookingStateMachine, LifecycleConfig, SideEffect, TransitionOptions};
pub use money::{Factor, FactorBounds, Money};
pub use notifications::{
    InMemoryNotifier, NotificationKind, NotificationPayload, NotificationRequest, Notifier,
    TracingNotifier,
};
pub use orchestrator::{
    CancelBookingRequest, LifecycleOrchestrator, SideEffectWarning, StatusChangeOutcome,
    StatusChangeRequest,
};
pub use ports::{
    BookingRepository, DeviceCatalog, PricingRuleRepository, StorageError, TechnicianDirectory,
};
pub use pricing::{PriceQuote, PricingConfig, PricingEngine, QuoteOverrides, QuoteRequest};
pub use technicians::{TechnicianSelector, UniformRandomSelector};
