//! Errors shared by every domain crate.

use thiserror::Error;

use crate::aggregate::ExpectedVersion;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures that do not depend on a particular domain. Stock-specific errors
/// live in `stockroom-inventory` and convert from this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// `kind` is the id type name, e.g. `"ProductId"`.
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    #[error("stale version: expected {expected:?}, found {actual}")]
    StaleVersion { expected: ExpectedVersion, actual: u64 },
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, reason: impl core::fmt::Display) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.to_string(),
        }
    }
}
