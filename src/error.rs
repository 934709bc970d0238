//! Error types for message lifecycle operations.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::common::MessageId;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PartialFailureRolledBack,
    StoreUnavailable,
    InvalidInput,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced user or message does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The message disappeared between the edit request and its classification.
    #[error("message {0} vanished before the edit could be classified")]
    MessageVanished(MessageId),

    /// Concurrent modification detected; nothing was written.
    #[error("conflicting concurrent modification: {0}")]
    Conflict(String),

    /// A multi-step update failed after earlier steps ran; all of it was reverted.
    #[error("{operation} failed at step `{step}` and was rolled back: {source}")]
    PartialFailureRolledBack {
        operation: &'static str,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Transient infrastructure failure.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// A reference that exists but is not allowed here (e.g. a parent in another conversation).
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The caller's deadline expired before the operation committed.
    #[error("operation cancelled before commit")]
    Cancelled,
}

impl Error {
    pub fn not_found<T: ToString>(entity: &'static str, id: T) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unavailable<T: ToString>(reason: T) -> Self {
        Self::StoreUnavailable {
            reason: reason.to_string(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::MessageVanished(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::PartialFailureRolledBack { .. } => ErrorKind::PartialFailureRolledBack,
            Error::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Error::InvalidReference(_) => ErrorKind::InvalidInput,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether repeating the same call may succeed. Every retryable error
    /// leaves the store exactly as it was before the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::StoreUnavailable | ErrorKind::PartialFailureRolledBack
        )
    }

    /// True when some writes ran before the failure and were reverted.
    pub fn rolled_back_partial_work(&self) -> bool {
        matches!(self, Error::PartialFailureRolledBack { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Error::Conflict(err.to_string())
            }
            Some(ErrorCode::OperationInterrupted) => Error::Cancelled,
            Some(ErrorCode::ConstraintViolation) => Error::InvalidReference(err.to_string()),
            _ => Error::StoreUnavailable {
                reason: "sqlite operation failed".to_string(),
                source: Some(err),
            },
        }
    }
}
