//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Storage and
/// transport failures are wrapped by the infra layer.
///
/// `Validation`, `InsufficientStock`, `NotFound` and `InvalidState` are
/// user-facing: the caller can fix its input and try again. `Busy` and
/// `Conflict` can be retried as-is. `InvariantViolation` is a defect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (missing line items, non-positive amounts, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The source location holds less than the requested amount.
    #[error("insufficient stock at {location}: available {available}, requested {requested}")]
    InsufficientStock {
        location: String,
        available: Decimal,
        requested: Decimal,
    },

    /// Unknown material cost, serial code, document or location.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity is in a state that does not allow the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A correction would produce a negative amount or desynchronise serial counts.
    #[error("correction rejected: {0}")]
    NegativeResult(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Lock acquisition timed out.
    #[error("busy: {0}")]
    Busy(String),

    /// A uniqueness or concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_stock(
        location: impl Into<String>,
        available: Decimal,
        requested: Decimal,
    ) -> Self {
        Self::InsufficientStock {
            location: location.into(),
            available,
            requested,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn negative_result(msg: impl Into<String>) -> Self {
        Self::NegativeResult(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether the caller can recover by adjusting its input.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InsufficientStock { .. }
                | Self::NotFound(_)
                | Self::InvalidState(_)
        )
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Conflict(_))
    }
}
