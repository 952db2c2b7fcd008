use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::{Actor, Role};
use crate::domain::booking::{
    Booking, BookingStatus, StatusHistoryEntry, TechnicianId, UrgencyLevel,
};
use crate::errors::DomainError;
use crate::lifecycle::states::{
    default_note, LifecycleConfig, SideEffect, TransitionOptions, TransitionPlan,
};
use crate::money::Money;
use crate::notifications::NotificationKind;

/// New prices computed while carrying out a `RecomputePrice` effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repricing {
    pub urgency: UrgencyLevel,
    pub base_price: Money,
    pub final_price: Money,
}

/// Results of the side effects that need collaborators outside the machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectResolution {
    pub technician: Option<TechnicianId>,
    pub repricing: Option<Repricing>,
}

/// The only writer of a booking's status.
///
/// Planning is pure: [`BookingStateMachine::plan`] validates the request and
/// lists the side effects; [`BookingStateMachine::apply`] then mutates the
/// booking with the resolved effects.
#[derive(Clone, Debug, Default)]
pub struct BookingStateMachine {
    config: LifecycleConfig,
}

impl BookingStateMachine {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn plan(
        &self,
        booking: &Booking,
        to: BookingStatus,
        actor: &Actor,
        options: &TransitionOptions,
        at: DateTime<Utc>,
    ) -> Result<TransitionPlan, DomainError> {
        if actor.role == Role::Customer {
            return Err(forbidden(actor, format!("move booking {} to {to}", booking.id)));
        }
        if to == BookingStatus::Refunded && !actor.role.is_admin() {
            return Err(forbidden(actor, format!("refund booking {}", booking.id)));
        }

        self.build_plan(booking, to, actor, options, at)
    }

    /// Cancellation as requested by the booking's owner. Staff fall through
    /// to the regular [`plan`](Self::plan) rules.
    pub fn plan_customer_cancel(
        &self,
        booking: &Booking,
        actor: &Actor,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<TransitionPlan, DomainError> {
        let options = TransitionOptions { note: reason, ..TransitionOptions::default() };
        if actor.role.is_staff() {
            return self.plan(booking, BookingStatus::Cancelled, actor, &options, at);
        }

        if booking.customer_id.0 != actor.id {
            return Err(forbidden(
                actor,
                format!("cancel booking {} of another customer", booking.id),
            ));
        }
        if !self.config.customer_cancellable.contains(&booking.status()) {
            return Err(forbidden(
                actor,
                format!("cancel booking {} while it is {}", booking.id, booking.status()),
            ));
        }

        self.build_plan(booking, BookingStatus::Cancelled, actor, &options, at)
    }

    fn build_plan(
        &self,
        booking: &Booking,
        to: BookingStatus,
        actor: &Actor,
        options: &TransitionOptions,
        at: DateTime<Utc>,
    ) -> Result<TransitionPlan, DomainError> {
        let from = booking.status();
        if !self.config.transitions.allows(from, to) {
            return Err(DomainError::IllegalTransition { from, to });
        }

        if options.technician_id.is_some() && to != BookingStatus::Confirmed {
            return Err(DomainError::InvariantViolation(format!(
                "a technician can only be assigned when confirming, not on {from} -> {to}"
            )));
        }
        if let Some(urgency) = options.urgency {
            if urgency < booking.urgency {
                return Err(DomainError::InvariantViolation(format!(
                    "urgency may only be escalated, not lowered from {} to {urgency}",
                    booking.urgency
                )));
            }
        }
        if to == BookingStatus::Completed {
            if let Some(scheduled) = booking.scheduled_date.filter(|scheduled| at < *scheduled) {
                return Err(DomainError::InvariantViolation(format!(
                    "booking {} cannot complete at {at}, before its scheduled date {scheduled}",
                    booking.id
                )));
            }
        }

        let auto_assign = options.auto_assign.unwrap_or(self.config.auto_assign_on_confirm);
        let mut effects = Vec::new();
        if to == BookingStatus::Confirmed && (options.technician_id.is_some() || auto_assign) {
            effects.push(SideEffect::AssignTechnician { preferred: options.technician_id.clone() });
        }

        let escalated = options.urgency.filter(|urgency| *urgency > booking.urgency);
        if escalated.is_some() || self.config.reprice_on.contains(&to) {
            effects.push(SideEffect::RecomputePrice {
                urgency: escalated.unwrap_or(booking.urgency),
            });
        }
        if to == BookingStatus::Completed {
            effects.push(SideEffect::StampCompletedAt);
        }
        effects.push(SideEffect::AppendHistory);
        if let Some(kind) = NotificationKind::for_destination(to) {
            effects.push(SideEffect::EmitNotification { kind });
        }

        Ok(TransitionPlan {
            booking_id: booking.id.clone(),
            from,
            to,
            actor: actor.clone(),
            at,
            note: options.note.clone().unwrap_or_else(|| default_note(to)),
            effects,
        })
    }

    /// Carries a plan out on `booking` and returns the appended history entry.
    pub fn apply(
        &self,
        booking: &mut Booking,
        plan: &TransitionPlan,
        resolution: EffectResolution,
    ) -> Result<StatusHistoryEntry, DomainError> {
        if booking.id != plan.booking_id || booking.status() != plan.from {
            return Err(DomainError::InvariantViolation(format!(
                "plan for {} ({} -> {}) does not match booking {} in {}",
                plan.booking_id,
                plan.from,
                plan.to,
                booking.id,
                booking.status()
            )));
        }

        if let Some(technician) = resolution.technician {
            if plan.assignment().is_none() {
                return Err(DomainError::InvariantViolation(format!(
                    "transition {} -> {} does not assign a technician",
                    plan.from, plan.to
                )));
            }
            booking.assigned_technician_id = Some(technician);
        }

        if let Some(repricing) = resolution.repricing {
            if plan.reprice_urgency() != Some(repricing.urgency) {
                return Err(DomainError::InvariantViolation(format!(
                    "transition {} -> {} does not reprice at {} urgency",
                    plan.from, plan.to, repricing.urgency
                )));
            }
            booking.urgency = repricing.urgency;
            booking.base_price = repricing.base_price;
            booking.final_price = repricing.final_price;
        }

        if plan.has(&SideEffect::StampCompletedAt) {
            booking.completed_at = Some(plan.at);
        }

        let entry = StatusHistoryEntry {
            from: plan.from,
            to: plan.to,
            changed_by: plan.actor.id.clone(),
            changed_at: plan.at,
            note: plan.note.clone(),
        };
        booking.record_transition(entry.clone());
        Ok(entry)
    }
}

fn forbidden(actor: &Actor, action: String) -> DomainError {
    DomainError::Forbidden { actor_id: actor.id.clone(), role: actor.role, action }
}
