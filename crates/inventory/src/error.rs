//! Stock accounting error taxonomy.

use thiserror::Error;

use stockroom_core::{AlertId, DomainError, ProductId};

use crate::alert::AlertStatus;

pub type StockResult<T> = Result<T, StockError>;

/// Every failure a stock operation can report to its caller.
///
/// Each variant is distinguishable so the (external) UI layer can map it to a
/// message. Only [`StockError::ConcurrencyConflict`] is worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Reserve asked for more than is available. Not retried automatically.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u64, available: u64 },

    /// Consume asked for more than is physically on hand (upstream workflow bug).
    #[error("invalid consumption: requested {requested}, on hand {on_hand}")]
    InvalidConsumption { requested: u64, on_hand: u64 },

    /// Adjust would leave fewer units on hand than are reserved.
    #[error("reservation violation: new quantity {requested} is below reserved {reserved}")]
    ReservationViolation { requested: u64, reserved: u64 },

    /// Lock timeout or optimistic retries exhausted.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("inventory record not found: {0}")]
    RecordNotFound(String),

    #[error("inventory record already exists for product {0}")]
    DuplicateRecord(ProductId),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("alert not found: {0}")]
    AlertNotFound(AlertId),

    #[error("alert {id} is already {status}")]
    AlertClosed { id: AlertId, status: AlertStatus },

    /// Replaying the movement history does not reproduce the stored balances.
    #[error("ledger mismatch: {0}")]
    LedgerMismatch(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StockError {
    pub fn record_not_found(what: impl core::fmt::Display) -> Self {
        Self::RecordNotFound(what.to_string())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self::LedgerMismatch(msg.into())
    }

    /// Whether the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::ConcurrencyConflict(_))
    }

    /// Stable short name, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            StockError::InsufficientStock { .. } => "insufficient_stock",
            StockError::InvalidConsumption { .. } => "invalid_consumption",
            StockError::ReservationViolation { .. } => "reservation_violation",
            StockError::ConcurrencyConflict(_) => "concurrency_conflict",
            StockError::RecordNotFound(_) => "record_not_found",
            StockError::DuplicateRecord(_) => "duplicate_record",
            StockError::InvalidQuantity(_) => "invalid_quantity",
            StockError::Validation(_) => "validation",
            StockError::AlertNotFound(_) => "alert_not_found",
            StockError::AlertClosed { .. } => "alert_closed",
            StockError::LedgerMismatch(_) => "ledger_mismatch",
            StockError::Unauthorized(_) => "unauthorized",
            StockError::Storage(_) => "storage",
        }
    }
}

impl From<DomainError> for StockError {
    fn from(value: DomainError) -> Self {
        match value {
            err @ DomainError::InvalidId { .. } => StockError::Validation(err.to_string()),
            err @ DomainError::StaleVersion { .. } => StockError::ConcurrencyConflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::ExpectedVersion;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(StockError::ConcurrencyConflict("stale".into()).is_retryable());
        assert!(!StockError::InsufficientStock { requested: 1, available: 0 }.is_retryable());
        assert!(!StockError::Storage("disk".into()).is_retryable());
    }

    #[test]
    fn domain_conflicts_become_concurrency_conflicts() {
        let err: StockError = DomainError::StaleVersion {
            expected: ExpectedVersion::Exact(3),
            actual: 4,
        }
        .into();
        assert_eq!(err.kind(), "concurrency_conflict");
    }
}
