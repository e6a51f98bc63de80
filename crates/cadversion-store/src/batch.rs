//! Write batches: every mutation of the version graph is one batch, applied
//! by the store in one transaction.

use cadversion_core::{Checkpoint, Delta, NodeId, SchemaMigration, VersionChain, VersionGraphHead};

/// One write inside a batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutChain(VersionChain),
    PutCheckpoint(Checkpoint),
    PutDelta(Delta),
    /// Set `is_schema_boundary` on an existing checkpoint.
    MarkSchemaBoundary(NodeId),
    PutMigration(SchemaMigration),
    DeleteCheckpoint(NodeId),
    DeleteDelta(NodeId),
    /// Replace the singleton head record.
    PutHead(VersionGraphHead),
}

/// An ordered list of writes that commit or fail together.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_chain(mut self, chain: VersionChain) -> Self {
        self.ops.push(WriteOp::PutChain(chain));
        self
    }

    pub fn put_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.ops.push(WriteOp::PutCheckpoint(checkpoint));
        self
    }

    pub fn put_delta(mut self, delta: Delta) -> Self {
        self.ops.push(WriteOp::PutDelta(delta));
        self
    }

    pub fn mark_schema_boundary(mut self, checkpoint_id: NodeId) -> Self {
        self.ops.push(WriteOp::MarkSchemaBoundary(checkpoint_id));
        self
    }

    pub fn put_migration(mut self, migration: SchemaMigration) -> Self {
        self.ops.push(WriteOp::PutMigration(migration));
        self
    }

    pub fn delete_checkpoint(mut self, id: NodeId) -> Self {
        self.ops.push(WriteOp::DeleteCheckpoint(id));
        self
    }

    pub fn delete_delta(mut self, id: NodeId) -> Self {
        self.ops.push(WriteOp::DeleteDelta(id));
        self
    }

    pub fn put_head(mut self, head: VersionGraphHead) -> Self {
        self.ops.push(WriteOp::PutHead(head));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl Extend<WriteOp> for WriteBatch {
    fn extend<I: IntoIterator<Item = WriteOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}
