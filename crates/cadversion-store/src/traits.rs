//! Store trait: the abstract interface for version graph persistence.
//!
//! This trait allows the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use cadversion_core::{
    ChainId, Checkpoint, Delta, NodeId, NodeSummary, SchemaMigration, VersionChain,
    VersionGraphHead,
};

use crate::batch::WriteBatch;
use crate::error::Result;

/// Everything reconstruction needs for one target version, read from one
/// consistent snapshot.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    /// Latest checkpoint of the chain at or before the target.
    pub checkpoint: Checkpoint,
    /// Deltas based on `checkpoint` with `version_number <= target`,
    /// ordered by `delta_sequence`.
    pub deltas: Vec<Delta>,
    /// The node stored at exactly the target version, if any.
    pub target: Option<NodeSummary>,
}

/// Aggregate over the deltas sharing one base checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaRun {
    pub count: usize,
    pub max_sequence: u64,
    pub total_bytes: u64,
}

/// The Store trait: async interface for version graph persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Batched writes**: the only mutating method is [`Store::apply`]. A batch
///   commits as a whole or not at all.
/// - **Constraints**: node ids, `(chain, version)` within a table and
///   `(chain, base, sequence)` are unique; references to chains and base
///   checkpoints are checked when the batch commits. Violations surface as
///   [`StoreError::Conflict`](crate::StoreError::Conflict).
/// - **Encoded changesets**: both backends keep changesets encoded and
///   decode them on read. A changeset that no longer decodes surfaces as
///   [`StoreError::Corrupt`](crate::StoreError::Corrupt) naming the delta.
/// - **No policy**: the store does not know about sealed chains, tips or
///   reachability. Those rules live in the engine.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a batch atomically.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Head and chains
    // ─────────────────────────────────────────────────────────────────────────

    /// The head record, or `None` for an empty store.
    async fn get_head(&self) -> Result<Option<VersionGraphHead>>;

    async fn get_chain(&self, id: &ChainId) -> Result<Option<VersionChain>>;

    /// All chains ordered by `start_version`.
    async fn list_chains(&self) -> Result<Vec<VersionChain>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_checkpoint(&self, id: &NodeId) -> Result<Option<Checkpoint>>;

    async fn get_delta(&self, id: &NodeId) -> Result<Option<Delta>>;

    /// Header of either kind of node.
    async fn get_node_summary(&self, id: &NodeId) -> Result<Option<NodeSummary>>;

    /// Headers of all nodes, or of one chain, ordered by version number.
    async fn list_node_summaries(&self, chain: Option<&ChainId>) -> Result<Vec<NodeSummary>>;

    /// The node of `chain` stored at `version`.
    async fn node_at_version(&self, chain: &ChainId, version: u64) -> Result<Option<NodeSummary>>;

    /// The node of `chain` with the greatest version number.
    async fn chain_tip(&self, chain: &ChainId) -> Result<Option<NodeSummary>>;

    /// The checkpoint of `chain` with the greatest version `<= at_or_before`.
    async fn latest_checkpoint(
        &self,
        chain: &ChainId,
        at_or_before: u64,
    ) -> Result<Option<NodeSummary>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Delta log
    // ─────────────────────────────────────────────────────────────────────────

    /// Deltas of `chain` based on `base`, ordered by sequence.
    async fn get_delta_sequence(&self, chain: &ChainId, base: &NodeId) -> Result<Vec<Delta>>;

    /// Count, highest sequence and total size of the deltas based on `base`.
    async fn delta_run(&self, chain: &ChainId, base: &NodeId) -> Result<DeltaRun>;

    // ─────────────────────────────────────────────────────────────────────────
    // Migrations and reconstruction
    // ─────────────────────────────────────────────────────────────────────────

    /// Recorded schema migrations in the order they were applied.
    async fn list_migrations(&self) -> Result<Vec<SchemaMigration>>;

    /// Load the checkpoint and deltas that materialize `version` of `chain`.
    ///
    /// Returns `None` when the chain has no checkpoint at or before `version`.
    async fn load_replay_plan(&self, chain: &ChainId, version: u64) -> Result<Option<ReplayPlan>>;
}
