use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::actor::Role;
use crate::domain::booking::{BookingStatus, RepairType};
use crate::domain::device::DeviceModelId;
use crate::domain::pricing_rule::{RuleId, RuleScope};
use crate::ports::StorageError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("illegal booking transition from {from} to {to}")]
    IllegalTransition { from: BookingStatus, to: BookingStatus },
    #[error("actor `{actor_id}` with role {role} may not {action}")]
    Forbidden { actor_id: String, role: Role, action: String },
    #[error("an active pricing rule already covers {scope} / {repair_type}")]
    RuleConflict { scope: RuleScope, repair_type: RepairType, conflicting_rule_id: Option<RuleId> },
    #[error("{factor} {value} is outside the allowed range {min}..={max}")]
    InvalidFactorRange { factor: String, value: Decimal, min: Decimal, max: Decimal },
    #[error("quote quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: u32 },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("device model `{0}` was not found")]
    DeviceNotFound(DeviceModelId),
    #[error("pricing rule `{0}` was not found")]
    RuleNotFound(RuleId),
    #[error("{entity} `{id}` changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict { entity: &'static str, id: String, expected: u32, actual: u32 },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StorageError> for ApplicationError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::VersionConflict { entity, id, expected, actual } => {
                Self::VersionConflict { entity, id, expected, actual }
            }
            StorageError::Missing { entity, id } => Self::NotFound { entity, id },
            StorageError::ActiveScopeConflict { scope, repair_type } => {
                Self::Domain(DomainError::RuleConflict {
                    scope,
                    repair_type,
                    conflicting_rule_id: None,
                })
            }
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested booking or pricing rule does not exist.",
            Self::Conflict { .. } => {
                "The record was changed by someone else. Reload it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id.into();
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Forbidden { .. }) => {
                Self::Forbidden { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::RuleConflict { .. })
            | ApplicationError::VersionConflict { .. } => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::Domain(_) => Self::BadRequest { message, correlation_id },
            ApplicationError::NotFound { .. }
            | ApplicationError::DeviceNotFound(_)
            | ApplicationError::RuleNotFound(_) => Self::NotFound { message, correlation_id },
            ApplicationError::Persistence(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(_) => Self::Internal { message, correlation_id },
        }
    }
}
