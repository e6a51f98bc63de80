//! Error types for the CAD Version Core.

use thiserror::Error;

/// Errors from encoding and decoding documents, changesets and headers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("malformed changeset: {0}")]
    MalformedChangeset(String),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] PatchError),
}

/// Errors from applying patch operations.
///
/// Patch application is all-or-nothing: when any of these is returned the
/// input document is untouched and no partial result exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// `replace`, `remove`, `move` or `test` addressed a location that does not exist,
    /// or `add` addressed a location whose parent does not exist.
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    /// `add` addressed a location that already holds a value, or whose parent
    /// is not a container.
    #[error("path conflict at {path}: {reason}")]
    PathConflict { path: String, reason: String },

    /// The path is not a well-formed pointer, or is not usable for the operation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A `test` operation found a different value.
    #[error("test failed at {path}")]
    TestFailed { path: String },
}

impl PatchError {
    pub(crate) fn not_found(path: impl ToString) -> Self {
        PatchError::PathNotFound {
            path: path.to_string(),
        }
    }

    pub(crate) fn conflict(path: impl ToString, reason: impl Into<String>) -> Self {
        PatchError::PathConflict {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(path: impl ToString, reason: impl Into<String>) -> Self {
        PatchError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// The path the failing operation addressed.
    pub fn path(&self) -> &str {
        match self {
            PatchError::PathNotFound { path }
            | PatchError::PathConflict { path, .. }
            | PatchError::InvalidPath { path, .. }
            | PatchError::TestFailed { path } => path,
        }
    }
}
