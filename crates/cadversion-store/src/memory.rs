//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It enforces the same uniqueness and
//! reference constraints as the SQLite layout but keeps everything in memory
//! with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use cadversion_core::{
    decode_changeset, encode_changeset, ChainId, Checkpoint, Delta, NodeId, NodeKind, NodeSummary,
    SchemaMigration, VersionChain, VersionGraphHead,
};

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{Result, StoreError};
use crate::traits::{DeltaRun, ReplayPlan, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; a
/// batch is applied to a copy of the state which replaces the original only
/// if every write and the final reference check succeed.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Clone, Default)]
struct MemoryStoreInner {
    head: Option<VersionGraphHead>,
    chains: HashMap<ChainId, VersionChain>,
    checkpoints: HashMap<NodeId, Checkpoint>,
    deltas: HashMap<NodeId, StoredDelta>,
    migrations: Vec<SchemaMigration>,
}

/// A delta held the way the SQLite table holds it: header fields plus the
/// encoded changeset, decoded again on every read.
#[derive(Clone)]
struct StoredDelta {
    header: Delta,
    changeset: Vec<u8>,
}

impl StoredDelta {
    fn new(mut delta: Delta) -> Self {
        let changeset = encode_changeset(&delta.changeset);
        delta.changeset = Vec::new();
        Self {
            header: delta,
            changeset,
        }
    }

    fn decode(&self) -> Result<Delta> {
        let changeset = decode_changeset(&self.changeset).map_err(|e| StoreError::Corrupt {
            id: self.header.id,
            reason: e.to_string(),
        })?;
        Ok(Delta {
            changeset,
            ..self.header.clone()
        })
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(StoreError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(StoreError::poisoned)
    }
}

impl MemoryStoreInner {
    fn apply_op(&mut self, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::PutChain(chain) => {
                if self.chains.contains_key(&chain.id) {
                    return Err(StoreError::Conflict(format!("chain {} exists", chain.id)));
                }
                if self
                    .chains
                    .values()
                    .any(|c| c.start_version == chain.start_version)
                {
                    return Err(StoreError::Conflict(format!(
                        "a chain already starts at version {}",
                        chain.start_version
                    )));
                }
                self.chains.insert(chain.id, chain);
            }
            WriteOp::PutCheckpoint(cp) => {
                if self.checkpoints.contains_key(&cp.id) {
                    return Err(StoreError::Conflict(format!("checkpoint {} exists", cp.id)));
                }
                if self.checkpoints.values().any(|c| {
                    c.chain_id == cp.chain_id && c.version_number == cp.version_number
                }) {
                    return Err(StoreError::Conflict(format!(
                        "checkpoint version {} taken in chain {}",
                        cp.version_number, cp.chain_id
                    )));
                }
                self.checkpoints.insert(cp.id, cp);
            }
            WriteOp::PutDelta(delta) => {
                if self.deltas.contains_key(&delta.id) {
                    return Err(StoreError::Conflict(format!("delta {} exists", delta.id)));
                }
                for d in self
                    .deltas
                    .values()
                    .map(|d| &d.header)
                    .filter(|d| d.chain_id == delta.chain_id)
                {
                    if d.version_number == delta.version_number {
                        return Err(StoreError::Conflict(format!(
                            "delta version {} taken in chain {}",
                            delta.version_number, delta.chain_id
                        )));
                    }
                    if d.base_checkpoint_id == delta.base_checkpoint_id
                        && d.delta_sequence == delta.delta_sequence
                    {
                        return Err(StoreError::Conflict(format!(
                            "delta sequence {} taken for base {}",
                            delta.delta_sequence, delta.base_checkpoint_id
                        )));
                    }
                }
                self.deltas.insert(delta.id, StoredDelta::new(delta));
            }
            WriteOp::MarkSchemaBoundary(id) => match self.checkpoints.get_mut(&id) {
                Some(cp) => cp.is_schema_boundary = true,
                None => return Err(StoreError::NotFound(format!("checkpoint {}", id))),
            },
            WriteOp::PutMigration(migration) => {
                if self
                    .migrations
                    .iter()
                    .any(|m| m.boundary_checkpoint_id == migration.boundary_checkpoint_id)
                {
                    return Err(StoreError::Conflict(format!(
                        "migration already anchored at {}",
                        migration.boundary_checkpoint_id
                    )));
                }
                self.migrations.push(migration);
            }
            WriteOp::DeleteCheckpoint(id) => {
                if self.checkpoints.remove(&id).is_none() {
                    return Err(StoreError::NotFound(format!("checkpoint {}", id)));
                }
            }
            WriteOp::DeleteDelta(id) => {
                if self.deltas.remove(&id).is_none() {
                    return Err(StoreError::NotFound(format!("delta {}", id)));
                }
            }
            WriteOp::PutHead(head) => self.head = Some(head),
        }
        Ok(())
    }

    /// The deferred foreign-key check.
    fn check_references(&self) -> Result<()> {
        for chain in self.chains.values() {
            if !self.checkpoints.contains_key(&chain.root_checkpoint_id) {
                return Err(StoreError::Conflict(format!(
                    "chain {} roots at missing checkpoint {}",
                    chain.id, chain.root_checkpoint_id
                )));
            }
        }
        for cp in self.checkpoints.values() {
            if !self.chains.contains_key(&cp.chain_id) {
                return Err(StoreError::Conflict(format!(
                    "checkpoint {} belongs to missing chain {}",
                    cp.id, cp.chain_id
                )));
            }
        }
        for delta in self.deltas.values().map(|d| &d.header) {
            if !self.chains.contains_key(&delta.chain_id) {
                return Err(StoreError::Conflict(format!(
                    "delta {} belongs to missing chain {}",
                    delta.id, delta.chain_id
                )));
            }
            if !self.checkpoints.contains_key(&delta.base_checkpoint_id) {
                return Err(StoreError::Conflict(format!(
                    "delta {} based on missing checkpoint {}",
                    delta.id, delta.base_checkpoint_id
                )));
            }
        }
        for migration in &self.migrations {
            if !self.checkpoints.contains_key(&migration.boundary_checkpoint_id) {
                return Err(StoreError::Conflict(format!(
                    "migration {} anchored at missing checkpoint {}",
                    migration.migration_name, migration.boundary_checkpoint_id
                )));
            }
        }
        Ok(())
    }

    fn summary(&self, id: &NodeId) -> Option<NodeSummary> {
        self.checkpoints
            .get(id)
            .map(NodeSummary::from)
            .or_else(|| self.deltas.get(id).map(|d| NodeSummary::from(&d.header)))
    }

    fn chain_nodes<'a>(&'a self, chain: &'a ChainId) -> impl Iterator<Item = NodeSummary> + 'a {
        self.checkpoints
            .values()
            .filter(move |c| &c.chain_id == chain)
            .map(NodeSummary::from)
            .chain(
                self.deltas
                    .values()
                    .map(|d| &d.header)
                    .filter(move |d| &d.chain_id == chain)
                    .map(NodeSummary::from),
            )
    }

    fn latest_checkpoint(&self, chain: &ChainId, at_or_before: u64) -> Option<&Checkpoint> {
        self.checkpoints
            .values()
            .filter(|c| &c.chain_id == chain && c.version_number <= at_or_before)
            .max_by_key(|c| c.version_number)
    }

    fn delta_sequence(&self, chain: &ChainId, base: &NodeId) -> Result<Vec<Delta>> {
        let by_sequence: BTreeMap<u64, &StoredDelta> = self
            .deltas
            .values()
            .filter(|d| &d.header.chain_id == chain && &d.header.base_checkpoint_id == base)
            .map(|d| (d.header.delta_sequence, d))
            .collect();
        by_sequence.into_values().map(StoredDelta::decode).collect()
    }

    fn node_at_version(&self, chain: &ChainId, version: u64) -> Option<NodeSummary> {
        self.chain_nodes(chain)
            .filter(|s| s.version_number == version)
            .min_by_key(|s| s.kind == NodeKind::Delta)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut inner = self.write()?;
        let mut next = inner.clone();
        for op in batch {
            next.apply_op(op)?;
        }
        next.check_references()?;
        *inner = next;
        Ok(())
    }

    async fn get_head(&self) -> Result<Option<VersionGraphHead>> {
        Ok(self.read()?.head.clone())
    }

    async fn get_chain(&self, id: &ChainId) -> Result<Option<VersionChain>> {
        Ok(self.read()?.chains.get(id).cloned())
    }

    async fn list_chains(&self) -> Result<Vec<VersionChain>> {
        let mut chains: Vec<_> = self.read()?.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.start_version);
        Ok(chains)
    }

    async fn get_checkpoint(&self, id: &NodeId) -> Result<Option<Checkpoint>> {
        Ok(self.read()?.checkpoints.get(id).cloned())
    }

    async fn get_delta(&self, id: &NodeId) -> Result<Option<Delta>> {
        self.read()?.deltas.get(id).map(StoredDelta::decode).transpose()
    }

    async fn get_node_summary(&self, id: &NodeId) -> Result<Option<NodeSummary>> {
        Ok(self.read()?.summary(id))
    }

    async fn list_node_summaries(&self, chain: Option<&ChainId>) -> Result<Vec<NodeSummary>> {
        let inner = self.read()?;
        let mut summaries: Vec<NodeSummary> = inner
            .checkpoints
            .values()
            .map(NodeSummary::from)
            .chain(inner.deltas.values().map(|d| NodeSummary::from(&d.header)))
            .filter(|s| chain.map_or(true, |c| &s.chain_id == c))
            .collect();
        summaries.sort_by_key(|s| (s.version_number, s.kind == NodeKind::Delta));
        Ok(summaries)
    }

    async fn node_at_version(&self, chain: &ChainId, version: u64) -> Result<Option<NodeSummary>> {
        Ok(self.read()?.node_at_version(chain, version))
    }

    async fn chain_tip(&self, chain: &ChainId) -> Result<Option<NodeSummary>> {
        let inner = self.read()?;
        let tip = inner
            .chain_nodes(chain)
            .max_by_key(|s| (s.version_number, s.kind == NodeKind::Delta));
        Ok(tip)
    }

    async fn latest_checkpoint(
        &self,
        chain: &ChainId,
        at_or_before: u64,
    ) -> Result<Option<NodeSummary>> {
        Ok(self
            .read()?
            .latest_checkpoint(chain, at_or_before)
            .map(NodeSummary::from))
    }

    async fn get_delta_sequence(&self, chain: &ChainId, base: &NodeId) -> Result<Vec<Delta>> {
        self.read()?.delta_sequence(chain, base)
    }

    async fn delta_run(&self, chain: &ChainId, base: &NodeId) -> Result<DeltaRun> {
        let inner = self.read()?;
        let run = inner
            .deltas
            .values()
            .map(|d| &d.header)
            .filter(|d| &d.chain_id == chain && &d.base_checkpoint_id == base)
            .fold(DeltaRun::default(), |run, d| DeltaRun {
                count: run.count + 1,
                max_sequence: run.max_sequence.max(d.delta_sequence),
                total_bytes: run.total_bytes + d.size_bytes,
            });
        Ok(run)
    }

    async fn list_migrations(&self) -> Result<Vec<SchemaMigration>> {
        Ok(self.read()?.migrations.clone())
    }

    async fn load_replay_plan(&self, chain: &ChainId, version: u64) -> Result<Option<ReplayPlan>> {
        let inner = self.read()?;
        let Some(checkpoint) = inner.latest_checkpoint(chain, version).cloned() else {
            return Ok(None);
        };
        let deltas = inner
            .delta_sequence(chain, &checkpoint.id)?
            .into_iter()
            .filter(|d| d.version_number <= version)
            .collect();
        let target = inner.node_at_version(chain, version);
        Ok(Some(ReplayPlan {
            checkpoint,
            deltas,
            target,
        }))
    }
}
