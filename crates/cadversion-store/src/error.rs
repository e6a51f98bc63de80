//! Error types for the store module.

use cadversion_core::NodeId;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored blob could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A write addressed a record that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write violated a uniqueness or reference constraint.
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A stored node's payload failed to decode.
    #[error("corrupt node {id}: {reason}")]
    Corrupt { id: NodeId, reason: String },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Storage layout migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// A lock guarding the backend was poisoned by a panicking writer.
    pub(crate) fn poisoned(detail: impl std::fmt::Display) -> Self {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("lock poisoned: {}", detail)),
        ))
    }

    /// True for uniqueness and reference violations from either backend.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
