//! Billing domain errors

use core_kernel::{CalendarError, MoneyError, PortError};
use thiserror::Error;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or out-of-range input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request collides with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lifecycle transition not allowed from the current status
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Ledger entry debits and credits differ
    #[error("Unbalanced ledger entry: debits={debits}, credits={credits}")]
    UnbalancedEntry { debits: i64, credits: i64 },

    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    /// Persistence failure; the enclosing transaction is rolled back
    #[error("Storage error: {0}")]
    Port(#[from] PortError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        BillingError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BillingError::Validation(errors.to_string())
    }
}
