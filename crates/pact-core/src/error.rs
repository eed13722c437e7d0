//! Error taxonomy for the Pact subsystem.
//!
//! One enum covers every failure class crossing a crate boundary. Callers
//! match on the kind rather than on message text; validation failures carry
//! a stable [`ValidationCode`] suitable for user-facing error responses.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable codes for argument validation failures.
///
/// The `as_str` spellings are part of the external contract (they surface in
/// HTTP 400 bodies) and must never change once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    PartitionKeyValueTooLong,
    PartitionKeyValueInvalid,
    ExternalIdValueNull,
    ExternalIdValueEmpty,
    ExternalIdValueTooLong,
    ExternalIdValueInvalid,
}

impl ValidationCode {
    /// The wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartitionKeyValueTooLong => "PartitionKey_ValueTooLong",
            Self::PartitionKeyValueInvalid => "PartitionKey_ValueInvalid",
            Self::ExternalIdValueNull => "ExternalId_ValueNull",
            Self::ExternalIdValueEmpty => "ExternalId_ValueEmpty",
            Self::ExternalIdValueTooLong => "ExternalId_ValueTooLong",
            Self::ExternalIdValueInvalid => "ExternalId_ValueInvalid",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type for every fallible Pact operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Argument shape, length, or character violation. User-facing.
    #[error("{code}: {message}")]
    Validation {
        /// Stable error code.
        code: ValidationCode,
        /// Human-readable detail.
        message: String,
    },

    /// API misuse: the operation is not legal in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An etag-conditional write lost the race. Recovered by the resilience
    /// pipeline or by treating a claim as unsuccessful.
    #[error("concurrency conflict: the document changed since it was read")]
    ConcurrencyConflict,

    /// A momentary lock could not be acquired within the retry budget.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// A `load` query matched more than one document.
    #[error("query matched more than one document")]
    MultipleMatches,

    /// Any other document-store failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The operation's cancellation token fired.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Build a validation error with its stable code.
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }

    /// Build an invalid-state (API misuse) error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Build a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// `true` for etag-mismatch conflicts, the only class the conflict
    /// pipeline retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict)
    }

    /// `true` when the operation was canceled by its token.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// `true` for user-facing argument validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// The stable validation code, when present.
    pub fn validation_code(&self) -> Option<ValidationCode> {
        match self {
            Self::Validation { code, .. } => Some(*code),
            _ => None,
        }
    }
}
