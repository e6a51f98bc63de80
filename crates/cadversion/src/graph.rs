//! The version graph: one document's history behind a store handle.
//!
//! All mutating operations serialize through one async writer lock, so every
//! read-validate-write sequence is atomic with respect to other writers. The
//! write itself is a single [`WriteBatch`]. Readers never take the lock.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use cadversion_core::{
    apply_owned, CborCodec, Checkpoint, Delta, DocumentCodec, Node, NodeId, VersionChain,
    VersionGraphHead,
};
use cadversion_store::{Store, WriteBatch};

use crate::config::VersionGraphConfig;
use crate::error::{Result, VersionGraphError};

/// The version graph engine.
///
/// Provides:
/// - Chain, checkpoint and delta creation
/// - Commits that advance the head atomically with the node write
/// - Reconstruction of any recorded version
/// - Schema migrations at checkpoint boundaries
/// - Tip truncation, garbage collection and integrity audits
pub struct VersionGraph<S: Store, C: DocumentCodec = CborCodec> {
    pub(crate) store: Arc<S>,
    pub(crate) codec: C,
    pub(crate) config: VersionGraphConfig,
    pub(crate) writer: Mutex<()>,
}

impl<S: Store> VersionGraph<S, CborCodec> {
    /// Create a version graph over `store` using the default CBOR codec.
    pub fn new(store: S, config: VersionGraphConfig) -> Self {
        Self::with_codec(store, CborCodec, config)
    }
}

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    pub fn with_codec(store: S, codec: C, config: VersionGraphConfig) -> Self {
        Self::from_shared(Arc::new(store), codec, config)
    }

    /// Create a version graph over a store handle shared with other code.
    ///
    /// Writes made to the store behind the graph's back bypass the writer
    /// lock and every validation rule.
    pub fn from_shared(store: Arc<S>, codec: C, config: VersionGraphConfig) -> Self {
        Self {
            store,
            codec,
            config,
            writer: Mutex::new(()),
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn config(&self) -> &VersionGraphConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Head
    // ─────────────────────────────────────────────────────────────────────────

    /// The current head. An empty store yields the default (uninitialized) head.
    pub async fn head(&self) -> Result<VersionGraphHead> {
        Ok(self.store.get_head().await?.unwrap_or_default())
    }

    pub(crate) async fn initialized_head(&self) -> Result<VersionGraphHead> {
        let head = self.head().await?;
        if !head.is_initialized() {
            return Err(VersionGraphError::NotInitialized);
        }
        Ok(head)
    }

    /// Commit a prepared node on top of the current tip.
    ///
    /// The node must carry `current_version + 1`, name the tip as its parent,
    /// and belong to the active chain. Node and head are written in one
    /// transaction; the new head is returned.
    pub async fn commit(&self, node: Node) -> Result<VersionGraphHead> {
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        self.append_locked(&head, node).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Node accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Either kind of node by id.
    pub async fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        if let Some(checkpoint) = self.store.get_checkpoint(id).await? {
            return Ok(Some(Node::Checkpoint(checkpoint)));
        }
        Ok(self.store.get_delta(id).await?.map(Node::Delta))
    }

    pub async fn get_checkpoint(&self, id: &NodeId) -> Result<Checkpoint> {
        self.store
            .get_checkpoint(id)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("checkpoint {}", id)))
    }

    pub async fn get_delta(&self, id: &NodeId) -> Result<Delta> {
        self.store
            .get_delta(id)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("delta {}", id)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals shared by the write paths. Callers hold the writer lock.
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn append_locked(
        &self,
        head: &VersionGraphHead,
        node: Node,
    ) -> Result<VersionGraphHead> {
        self.validate_append(head, &node).await?;
        self.write_node(head, node, WriteBatch::new()).await
    }

    /// The chain with the greatest start version. Only it accepts writes.
    pub(crate) async fn active_chain(&self) -> Result<Option<VersionChain>> {
        Ok(self.store.list_chains().await?.pop())
    }

    pub(crate) async fn ensure_writable(&self, chain: &VersionChain) -> Result<()> {
        let active = self.active_chain().await?;
        if active.map(|c| c.id) != Some(chain.id) {
            return Err(VersionGraphError::ChainSealed(chain.id));
        }
        if let Some(tip) = self.store.chain_tip(&chain.id).await? {
            if tip.is_schema_boundary {
                return Err(VersionGraphError::ChainSealed(chain.id));
            }
        }
        Ok(())
    }

    async fn validate_append(&self, head: &VersionGraphHead, node: &Node) -> Result<()> {
        let verified = match node {
            Node::Checkpoint(cp) => cp.verify_id(),
            Node::Delta(d) => d.verify_id(),
        };
        if !verified {
            return Err(VersionGraphError::InvalidOperation(format!(
                "node id {} does not match its content",
                node.id()
            )));
        }

        if node.version_number() != head.next_version() {
            return Err(VersionGraphError::StaleNode(format!(
                "version {} does not follow current version {}",
                node.version_number(),
                head.current_version
            )));
        }

        let chain = self
            .store
            .get_chain(&node.chain_id())
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("chain {}", node.chain_id())))?;

        let parent_id = node.parent_id().ok_or_else(|| {
            VersionGraphError::InvalidOperation("only a chain root may omit its parent".into())
        })?;
        let parent = self
            .store
            .get_node_summary(&parent_id)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("parent node {}", parent_id)))?;
        if parent.chain_id != chain.id {
            return Err(VersionGraphError::ChainMismatch {
                node: parent_id,
                chain: chain.id,
            });
        }

        self.ensure_writable(&chain).await?;

        if head.latest_version_id != Some(parent_id) {
            return Err(VersionGraphError::StaleNode(format!(
                "parent {} is not the current tip",
                parent_id
            )));
        }

        if node.schema_version() != chain.schema_version {
            return Err(VersionGraphError::SchemaVersionMismatch {
                expected: chain.schema_version,
                found: node.schema_version(),
            });
        }

        match node {
            Node::Checkpoint(cp) if cp.is_schema_boundary => Err(
                VersionGraphError::InvalidOperation(
                    "schema boundaries are only set by migrations".into(),
                ),
            ),
            Node::Checkpoint(_) => Ok(()),
            Node::Delta(delta) => self.validate_delta(head, &chain, delta).await,
        }
    }

    async fn validate_delta(
        &self,
        head: &VersionGraphHead,
        chain: &VersionChain,
        delta: &Delta,
    ) -> Result<()> {
        let base = self
            .store
            .get_node_summary(&delta.base_checkpoint_id)
            .await?
            .filter(|s| s.is_checkpoint())
            .ok_or_else(|| {
                VersionGraphError::NotFound(format!(
                    "base checkpoint {}",
                    delta.base_checkpoint_id
                ))
            })?;
        if base.chain_id != chain.id {
            return Err(VersionGraphError::ChainMismatch {
                node: base.id,
                chain: chain.id,
            });
        }

        let latest = self
            .store
            .latest_checkpoint(&chain.id, head.current_version)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("checkpoints of chain {}", chain.id)))?;
        if latest.id != base.id {
            return Err(VersionGraphError::StaleBaseCheckpoint {
                base: base.id,
                latest: latest.id,
            });
        }

        let run = self.store.delta_run(&chain.id, &base.id).await?;
        if delta.delta_sequence != run.max_sequence + 1 {
            return Err(VersionGraphError::StaleNode(format!(
                "delta sequence {} does not follow {}",
                delta.delta_sequence, run.max_sequence
            )));
        }

        if self.config.validate_deltas_on_write {
            let state = self.replay(chain, head.current_version).await?;
            apply_owned(state, &delta.changeset)?;
        }
        Ok(())
    }

    /// Persist `node` with the advanced head, plus any extra writes in `batch`.
    pub(crate) async fn write_node(
        &self,
        head: &VersionGraphHead,
        node: Node,
        batch: WriteBatch,
    ) -> Result<VersionGraphHead> {
        let next = head.advance(&node);
        let (id, kind, size) = (node.id(), node.kind(), node.size_bytes());
        let batch = match node {
            Node::Checkpoint(cp) => batch.put_checkpoint(cp),
            Node::Delta(d) => batch.put_delta(d),
        };
        self.store.apply(batch.put_head(next.clone())).await?;
        info!(
            version = next.current_version,
            node = %id,
            kind = kind.as_str(),
            size,
            "committed node"
        );
        Ok(next)
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

/// Whole milliseconds, saturating at `i64::MAX`.
fn duration_millis(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_millis_saturate() {
        assert_eq!(duration_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
        assert!(now_millis() > 0);
    }
}
