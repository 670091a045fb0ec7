//! Queue errors.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Item not found.
    #[error("Item not found: {0}")]
    TaskNotFound(String),

    /// Status change not allowed from the item's current status.
    #[error("Item {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// The database is locked by another writer.
    #[error("Database busy: {0}")]
    Contention(String),

    /// Database error that retrying will not fix.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored payload is not valid JSON.
    #[error("Payload decode error: {0}")]
    Decode(String),

    /// Task execution failed.
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// A handler is already registered for this kind.
    #[error("Handler already registered for kind: {0}")]
    DuplicateHandler(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error.
    #[error("{0}")]
    Custom(String),
}

impl QueueError {
    /// Whether the operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Contention(_))
    }

    /// Whether the store is unusable and loops should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Database(_))
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                QueueError::Contention(err.to_string())
            }
            _ => QueueError::Database(err.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            other => QueueError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}
