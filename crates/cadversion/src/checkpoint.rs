//! Checkpoint store operations.

use bytes::Bytes;

use cadversion_core::{ChainId, Checkpoint, CheckpointBuilder, DocumentCodec, Node, NodeId};
use cadversion_store::Store;

use crate::error::{Result, VersionGraphError};
use crate::graph::{now_millis, VersionGraph};

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Write a full snapshot at the next version of `chain_id`.
    ///
    /// `parent_id` must be the current tip and belong to `chain_id`
    /// (`ChainMismatch` otherwise). Only chain roots have no parent, and
    /// those are created through [`create_chain`](Self::create_chain).
    pub async fn create_checkpoint(
        &self,
        parent_id: Option<NodeId>,
        chain_id: &ChainId,
        data: impl Into<Bytes>,
        description: &str,
        is_manual_save: bool,
    ) -> Result<Checkpoint> {
        let data = data.into();
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        let chain = self.get_chain(chain_id).await?;

        let checkpoint =
            CheckpointBuilder::new(chain.id, head.next_version(), chain.schema_version, data)
                .parent(parent_id)
                .timestamp(now_millis())
                .description(description)
                .manual_save(is_manual_save)
                .build();
        self.append_locked(&head, Node::Checkpoint(checkpoint.clone()))
            .await?;
        Ok(checkpoint)
    }

    /// Snapshot the materialized current state as a new checkpoint on the tip.
    ///
    /// Caller holds the writer lock.
    pub(crate) async fn snapshot_tip_locked(
        &self,
        description: &str,
        is_manual_save: bool,
    ) -> Result<Checkpoint> {
        let head = self.initialized_head().await?;
        let tip = head
            .latest_version_id
            .ok_or(VersionGraphError::NotInitialized)?;
        let tip_summary = self
            .store
            .get_node_summary(&tip)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("tip node {}", tip)))?;
        let chain = self.get_chain(&tip_summary.chain_id).await?;

        let state = self.replay(&chain, head.current_version).await?;
        let data = self.codec.encode(&state)?;

        let checkpoint =
            CheckpointBuilder::new(chain.id, head.next_version(), chain.schema_version, data)
                .parent(Some(tip))
                .timestamp(now_millis())
                .description(description)
                .manual_save(is_manual_save)
                .build();
        self.append_locked(&head, Node::Checkpoint(checkpoint.clone()))
            .await?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CheckpointDraft;
    use crate::config::VersionGraphConfig;
    use cadversion_core::{SchemaVersion, VersionChain};
    use cadversion_store::MemoryStore;

    async fn setup() -> (VersionGraph<MemoryStore>, VersionChain) {
        let graph = VersionGraph::new(MemoryStore::new(), VersionGraphConfig::default());
        let chain = graph
            .create_chain(SchemaVersion(1), CheckpointDraft::new(SchemaVersion(1), vec![0xf6u8]))
            .await
            .unwrap();
        (graph, chain)
    }

    #[tokio::test]
    async fn test_create_checkpoint_assigns_next_version() {
        let (graph, chain) = setup().await;
        let cp = graph
            .create_checkpoint(Some(chain.root_checkpoint_id), &chain.id, vec![0xf5u8], "cp2", false)
            .await
            .unwrap();

        assert_eq!(cp.version_number, 2);
        assert_eq!(cp.schema_version, SchemaVersion(1));
        assert_eq!(cp.parent_id, Some(chain.root_checkpoint_id));
        assert_eq!(graph.get_checkpoint(&cp.id).await.unwrap(), cp);
        assert_eq!(graph.head().await.unwrap().latest_version_id, Some(cp.id));
    }

    #[tokio::test]
    async fn test_parent_from_other_chain_is_mismatch() {
        let (graph, first) = setup().await;
        let second = graph
            .create_chain(SchemaVersion(1), CheckpointDraft::new(SchemaVersion(1), vec![0xf6u8]))
            .await
            .unwrap();

        let err = graph
            .create_checkpoint(Some(first.root_checkpoint_id), &second.id, vec![0xf6u8], "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionGraphError::ChainMismatch { .. }));
    }

    #[tokio::test]
    async fn test_write_to_sealed_chain() {
        let (graph, first) = setup().await;
        graph
            .create_chain(SchemaVersion(1), CheckpointDraft::new(SchemaVersion(1), vec![0xf6u8]))
            .await
            .unwrap();

        let err = graph
            .create_checkpoint(Some(first.root_checkpoint_id), &first.id, vec![0xf6u8], "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionGraphError::ChainSealed(id) if id == first.id));
    }

    #[tokio::test]
    async fn test_missing_parent_and_rootless_checkpoint() {
        let (graph, chain) = setup().await;
        let err = graph
            .create_checkpoint(Some(NodeId::from_bytes([5; 32])), &chain.id, vec![0xf6u8], "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionGraphError::NotFound(_)));

        let err = graph
            .create_checkpoint(None, &chain.id, vec![0xf6u8], "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionGraphError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_manual_checkpoint_sets_user_save_point() {
        let (graph, chain) = setup().await;
        let cp = graph
            .create_checkpoint(Some(chain.root_checkpoint_id), &chain.id, vec![0xf6u8], "save", true)
            .await
            .unwrap();
        let head = graph.head().await.unwrap();
        assert_eq!(head.user_checkpoint_version_id, Some(cp.id));
    }
}
