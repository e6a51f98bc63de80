//! Error types for the version graph engine.

use cadversion_core::{ChainId, CoreError, NodeId, PatchError, SchemaVersion};
use cadversion_store::StoreError;
use thiserror::Error;

/// Errors that can occur during version graph operations.
///
/// All of these are local and recoverable; the engine never retries
/// internally.
#[derive(Debug, Error)]
pub enum VersionGraphError {
    /// A referenced chain, node or dependency is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node referenced from `chain` belongs to another chain.
    #[error("node {node} does not belong to chain {chain}")]
    ChainMismatch { node: NodeId, chain: ChainId },

    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        found: SchemaVersion,
    },

    /// A changeset could not be applied.
    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),

    #[error("schema migration boundary violation: {0}")]
    SchemaMigrationBoundaryViolation(String),

    /// No migration path connects the two schema versions.
    #[error("schema {from} cannot reach schema {to}")]
    SchemaIncompatible {
        from: SchemaVersion,
        to: SchemaVersion,
    },

    /// A stored node could not be decoded or replayed.
    #[error("corrupt node {node}: {reason}")]
    Corruption { node: NodeId, reason: String },

    /// No recorded node at this version.
    #[error("version {0} not found")]
    VersionNotFound(u64),

    /// A delta must be based on the chain's latest checkpoint.
    #[error("base checkpoint {base} is stale; latest is {latest}")]
    StaleBaseCheckpoint { base: NodeId, latest: NodeId },

    /// The chain no longer accepts writes.
    #[error("chain {0} is sealed")]
    ChainSealed(ChainId),

    /// The node does not extend the current tip.
    #[error("stale node: {0}")]
    StaleNode(String),

    /// Only the tip delta may be deleted.
    #[error("delta {0} is not the tip")]
    NonTipDeletion(NodeId),

    #[error("version graph already initialized")]
    AlreadyInitialized,

    #[error("version graph not initialized")]
    NotInitialized,

    /// User-supplied migration logic failed.
    #[error("migration {name} failed: {reason}")]
    MigrationFailed { name: String, reason: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Encoding error from the document codec.
    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for VersionGraphError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { id, reason } => {
                VersionGraphError::Corruption { node: id, reason }
            }
            other => VersionGraphError::Store(other),
        }
    }
}

impl VersionGraphError {
    /// True for `PathNotFound` from the patch engine.
    pub fn is_path_not_found(&self) -> bool {
        matches!(self, VersionGraphError::Patch(PatchError::PathNotFound { .. }))
    }

    /// True for `PathConflict` from the patch engine.
    pub fn is_path_conflict(&self) -> bool {
        matches!(self, VersionGraphError::Patch(PatchError::PathConflict { .. }))
    }
}

/// Result type for version graph operations.
pub type Result<T> = std::result::Result<T, VersionGraphError>;
