//! Chain store operations.

use bytes::Bytes;
use tracing::info;

use cadversion_core::{
    ChainId, Checkpoint, CheckpointBuilder, DocumentCodec, Node, SchemaVersion, VersionChain,
    VersionGraphHead,
};
use cadversion_store::{Store, WriteBatch};

use crate::error::{Result, VersionGraphError};
use crate::graph::{now_millis, VersionGraph};

/// The root checkpoint of a chain that is about to be created.
///
/// The engine assigns the chain id, version number and timestamp.
#[derive(Debug, Clone)]
pub struct CheckpointDraft {
    pub schema_version: SchemaVersion,
    pub data: Bytes,
    pub description: String,
    pub is_manual_save: bool,
}

impl CheckpointDraft {
    pub fn new(schema_version: SchemaVersion, data: impl Into<Bytes>) -> Self {
        Self {
            schema_version,
            data: data.into(),
            description: String::new(),
            is_manual_save: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn manual_save(mut self, manual: bool) -> Self {
        self.is_manual_save = manual;
        self
    }
}

/// Build a chain starting at the head's next version and its root checkpoint.
pub(crate) fn build_root(
    head: &VersionGraphHead,
    draft: CheckpointDraft,
) -> (VersionChain, Checkpoint) {
    let version = head.next_version();
    let chain_id = ChainId::derive(draft.schema_version, version);
    let root = CheckpointBuilder::new(chain_id, version, draft.schema_version, draft.data)
        .timestamp(now_millis())
        .description(draft.description)
        .manual_save(draft.is_manual_save)
        .build();
    let chain = VersionChain {
        id: chain_id,
        schema_version: draft.schema_version,
        start_version: version,
        root_checkpoint_id: root.id,
    };
    (chain, root)
}

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Start a new chain rooted at a fresh checkpoint.
    ///
    /// The new chain becomes the active one and every earlier chain is
    /// sealed. No migration is recorded, so the earlier schema era is not
    /// connected to the new one.
    pub async fn create_chain(
        &self,
        schema_version: SchemaVersion,
        root: CheckpointDraft,
    ) -> Result<VersionChain> {
        if root.schema_version != schema_version {
            return Err(VersionGraphError::SchemaVersionMismatch {
                expected: schema_version,
                found: root.schema_version,
            });
        }

        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        self.start_chain_locked(&head, root).await
    }

    pub(crate) async fn start_chain_locked(
        &self,
        head: &VersionGraphHead,
        root: CheckpointDraft,
    ) -> Result<VersionChain> {
        let (chain, checkpoint) = build_root(head, root);
        self.write_node(
            head,
            Node::Checkpoint(checkpoint),
            WriteBatch::new().put_chain(chain.clone()),
        )
        .await?;

        info!(
            chain = %chain.id,
            schema = %chain.schema_version,
            start_version = chain.start_version,
            "started chain"
        );
        Ok(chain)
    }

    pub async fn get_chain(&self, id: &ChainId) -> Result<VersionChain> {
        self.store
            .get_chain(id)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("chain {}", id)))
    }

    /// All chains ordered by start version.
    pub async fn list_chains(&self) -> Result<Vec<VersionChain>> {
        Ok(self.store.list_chains().await?)
    }

    /// The chain whose era contains `version`.
    ///
    /// A chain's era runs from its start version up to the version before the
    /// next chain starts, or up to the head for the active chain.
    pub async fn chain_for_version(&self, version: u64) -> Result<Option<VersionChain>> {
        let head = self.head().await?;
        if version == 0 || version > head.current_version {
            return Ok(None);
        }
        let chains = self.store.list_chains().await?;
        Ok(chains
            .into_iter()
            .rev()
            .find(|chain| chain.start_version <= version))
    }

    /// True when the chain no longer accepts writes.
    pub async fn is_sealed(&self, chain_id: &ChainId) -> Result<bool> {
        let chain = self.get_chain(chain_id).await?;
        match self.ensure_writable(&chain).await {
            Ok(()) => Ok(false),
            Err(VersionGraphError::ChainSealed(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersionGraphConfig;
    use cadversion_store::MemoryStore;

    fn graph() -> VersionGraph<MemoryStore> {
        VersionGraph::new(MemoryStore::new(), VersionGraphConfig::default())
    }

    #[tokio::test]
    async fn test_create_chain_moves_head_to_root() {
        let graph = graph();
        let chain = graph
            .create_chain(
                SchemaVersion(1),
                CheckpointDraft::new(SchemaVersion(1), b"doc".to_vec()).description("new"),
            )
            .await
            .unwrap();

        assert_eq!(chain.start_version, 1);
        let head = graph.head().await.unwrap();
        assert_eq!(head.latest_version_id, Some(chain.root_checkpoint_id));
        assert_eq!(head.current_schema_version, SchemaVersion(1));
        assert_eq!(head.total_size, 3);

        let root = graph.get_checkpoint(&chain.root_checkpoint_id).await.unwrap();
        assert!(root.is_root());
        assert_eq!(root.version_number, chain.start_version);
    }

    #[tokio::test]
    async fn test_create_chain_schema_mismatch() {
        let graph = graph();
        let err = graph
            .create_chain(
                SchemaVersion(2),
                CheckpointDraft::new(SchemaVersion(1), Vec::<u8>::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VersionGraphError::SchemaVersionMismatch { expected, found }
                if expected == SchemaVersion(2) && found == SchemaVersion(1)
        ));
        assert!(graph.list_chains().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_chain_seals_previous() {
        let graph = graph();
        let first = graph
            .create_chain(SchemaVersion(1), CheckpointDraft::new(SchemaVersion(1), vec![1u8]))
            .await
            .unwrap();
        let second = graph
            .create_chain(SchemaVersion(1), CheckpointDraft::new(SchemaVersion(1), vec![2u8]))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.start_version, 2);
        assert!(graph.is_sealed(&first.id).await.unwrap());
        assert!(!graph.is_sealed(&second.id).await.unwrap());

        assert_eq!(graph.chain_for_version(1).await.unwrap(), Some(first));
        assert_eq!(graph.chain_for_version(2).await.unwrap(), Some(second));
        assert_eq!(graph.chain_for_version(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_missing_chain() {
        let graph = graph();
        let missing = ChainId::derive(SchemaVersion(1), 42);
        assert!(matches!(
            graph.get_chain(&missing).await,
            Err(VersionGraphError::NotFound(_))
        ));
    }
}
