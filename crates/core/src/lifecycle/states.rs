use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::Actor;
use crate::domain::booking::{BookingId, BookingStatus, TechnicianId, UrgencyLevel};
use crate::errors::DomainError;
use crate::notifications::NotificationKind;

/// Legal `(from, to)` status pairs. Everything not listed is illegal,
/// self-transitions included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionTable {
    edges: BTreeMap<BookingStatus, BTreeSet<BookingStatus>>,
}

impl TransitionTable {
    pub fn standard() -> Self {
        use BookingStatus::{
            Cancelled, Completed, Confirmed, InProgress, Pending, Refunded, WaitingApproval,
            WaitingParts,
        };

        let edges = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, InProgress),
            (Confirmed, Cancelled),
            (InProgress, WaitingParts),
            (InProgress, WaitingApproval),
            (InProgress, Completed),
            (InProgress, Cancelled),
            (WaitingParts, InProgress),
            (WaitingParts, Cancelled),
            (WaitingApproval, InProgress),
            (WaitingApproval, Cancelled),
            (Completed, Refunded),
        ];

        let mut table = Self { edges: BTreeMap::new() };
        for (from, to) in edges {
            table.edges.entry(from).or_default().insert(to);
        }
        table
    }

    pub fn from_edges(
        edges: impl IntoIterator<Item = (BookingStatus, BookingStatus)>,
    ) -> Result<Self, DomainError> {
        let mut table = Self { edges: BTreeMap::new() };
        for (from, to) in edges {
            if from == to {
                return Err(DomainError::InvariantViolation(format!(
                    "transition table may not contain the self-transition {from} -> {to}"
                )));
            }
            table.edges.entry(from).or_default().insert(to);
        }
        Ok(table)
    }

    pub fn allows(&self, from: BookingStatus, to: BookingStatus) -> bool {
        self.edges.get(&from).is_some_and(|destinations| destinations.contains(&to))
    }

    pub fn destinations(&self, from: BookingStatus) -> Vec<BookingStatus> {
        self.edges.get(&from).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    pub fn is_terminal(&self, status: BookingStatus) -> bool {
        self.edges.get(&status).map_or(true, BTreeSet::is_empty)
    }

    pub fn edges(&self) -> impl Iterator<Item = (BookingStatus, BookingStatus)> + '_ {
        self.edges.iter().flat_map(|(from, tos)| tos.iter().map(move |to| (*from, *to)))
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Immutable lifecycle policy injected into the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub transitions: TransitionTable,
    /// Assign a technician when a booking is confirmed without one named.
    pub auto_assign_on_confirm: bool,
    /// Destinations that trigger a fresh price quote.
    pub reprice_on: BTreeSet<BookingStatus>,
    /// Statuses from which customers may cancel their own booking.
    pub customer_cancellable: BTreeSet<BookingStatus>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transitions: TransitionTable::standard(),
            auto_assign_on_confirm: true,
            reprice_on: BTreeSet::new(),
            customer_cancellable: [BookingStatus::Pending, BookingStatus::Confirmed]
                .into_iter()
                .collect(),
        }
    }
}

/// Work a transition implies, in the order it must be carried out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    /// `preferred` is the technician named by the caller; when absent one
    /// is picked from the available pool.
    AssignTechnician { preferred: Option<TechnicianId> },
    RecomputePrice { urgency: UrgencyLevel },
    StampCompletedAt,
    AppendHistory,
    EmitNotification { kind: NotificationKind },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOptions {
    pub note: Option<String>,
    pub technician_id: Option<TechnicianId>,
    /// Escalated urgency; triggers repricing.
    pub urgency: Option<UrgencyLevel>,
    /// Pick a technician on confirmation. Unset falls back to
    /// `LifecycleConfig::auto_assign_on_confirm`.
    pub auto_assign: Option<bool>,
}

/// A validated transition that has not yet touched the booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub booking_id: BookingId,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    pub note: String,
    pub effects: Vec<SideEffect>,
}

impl TransitionPlan {
    pub fn assignment(&self) -> Option<Option<&TechnicianId>> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::AssignTechnician { preferred } => Some(preferred.as_ref()),
            _ => None,
        })
    }

    pub fn reprice_urgency(&self) -> Option<UrgencyLevel> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::RecomputePrice { urgency } => Some(*urgency),
            _ => None,
        })
    }

    pub fn notification(&self) -> Option<NotificationKind> {
        self.effects.iter().find_map(|effect| match effect {
            SideEffect::EmitNotification { kind } => Some(*kind),
            _ => None,
        })
    }

    pub fn has(&self, effect: &SideEffect) -> bool {
        self.effects.contains(effect)
    }
}

pub fn default_note(to: BookingStatus) -> String {
    format!("Status updated to {to}")
}

#[cfg(test)]
mod tests {
    use super::{default_note, TransitionTable};
    use crate::domain::booking::BookingStatus;

    #[test]
    fn standard_table_has_two_terminal_states() {
        let table = TransitionTable::standard();
        let terminal: Vec<_> =
            BookingStatus::ALL.into_iter().filter(|status| table.is_terminal(*status)).collect();

        assert_eq!(terminal, vec![BookingStatus::Cancelled, BookingStatus::Refunded]);
        assert_eq!(table.edges().count(), 13);
    }

    #[test]
    fn self_transitions_are_never_legal() {
        let table = TransitionTable::standard();
        for status in BookingStatus::ALL {
            assert!(!table.allows(status, status), "{status}");
        }
        assert!(TransitionTable::from_edges([(BookingStatus::Pending, BookingStatus::Pending)])
            .is_err());
    }

    #[test]
    fn completed_only_moves_to_refunded() {
        let table = TransitionTable::standard();
        assert_eq!(table.destinations(BookingStatus::Completed), vec![BookingStatus::Refunded]);
    }

    #[test]
    fn default_note_uses_storage_encoding() {
        assert_eq!(default_note(BookingStatus::InProgress), "Status updated to IN_PROGRESS");
    }
}
