//! Reconstruction: materialize any recorded version.
//!
//! The nearest checkpoint at or before the target is decoded and the deltas
//! based on it are folded through the patch engine. Cost is linear in the
//! number of deltas since that checkpoint. Nothing here writes.

use std::time::Duration;

use tracing::warn;

use cadversion_core::{apply_owned, ChainId, Document, DocumentCodec, VersionChain};
use cadversion_store::Store;

use crate::error::{Result, VersionGraphError};
use crate::graph::VersionGraph;

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// The document as of `version_number`, addressed through `chain_id`.
    ///
    /// When the version lies in another chain's era, it resolves there
    /// provided the two schemas are connected by recorded migrations;
    /// otherwise `SchemaIncompatible`.
    ///
    /// Reads are read-committed. The owning chain is resolved before the
    /// replay plan is loaded, and only the plan is read in one transaction,
    /// so a tip truncated in between reports `VersionNotFound`.
    pub async fn get_state_at(&self, chain_id: &ChainId, version_number: u64) -> Result<Document> {
        let chain = self.get_chain(chain_id).await?;
        let owner = self
            .chain_for_version(version_number)
            .await?
            .ok_or(VersionGraphError::VersionNotFound(version_number))?;

        if owner.id != chain.id
            && self
                .migration_path(chain.schema_version, owner.schema_version)
                .await?
                .is_none()
        {
            return Err(VersionGraphError::SchemaIncompatible {
                from: chain.schema_version,
                to: owner.schema_version,
            });
        }

        self.replay(&owner, version_number).await
    }

    /// [`get_state_at`](Self::get_state_at) bounded by a deadline.
    pub async fn get_state_at_with_deadline(
        &self,
        chain_id: &ChainId,
        version_number: u64,
        deadline: Duration,
    ) -> Result<Document> {
        tokio::time::timeout(deadline, self.get_state_at(chain_id, version_number))
            .await
            .map_err(|_| VersionGraphError::DeadlineExceeded)?
    }

    /// The document as of `version_number`, in whichever chain owns it.
    pub async fn get_state_at_version(&self, version_number: u64) -> Result<Document> {
        let owner = self
            .chain_for_version(version_number)
            .await?
            .ok_or(VersionGraphError::VersionNotFound(version_number))?;
        self.replay(&owner, version_number).await
    }

    /// The document at the head.
    pub async fn current_state(&self) -> Result<Document> {
        let head = self.initialized_head().await?;
        self.get_state_at_version(head.current_version).await
    }

    /// Materialize `version` of `chain` from one consistent replay plan.
    pub(crate) async fn replay(&self, chain: &VersionChain, version: u64) -> Result<Document> {
        let plan = self
            .store
            .load_replay_plan(&chain.id, version)
            .await?
            .ok_or(VersionGraphError::VersionNotFound(version))?;
        if plan.target.is_none() {
            return Err(VersionGraphError::VersionNotFound(version));
        }

        let checkpoint = &plan.checkpoint;
        // Deltas on one base carry contiguous sequences and versions. A hole
        // means a node was removed underneath us.
        for (i, delta) in plan.deltas.iter().enumerate() {
            let expected = i as u64 + 1;
            if delta.delta_sequence != expected
                || delta.version_number != checkpoint.version_number + expected
            {
                warn!(
                    base = %checkpoint.id,
                    expected_sequence = expected,
                    found_sequence = delta.delta_sequence,
                    "delta sequence has a hole"
                );
                return Err(VersionGraphError::NotFound(format!(
                    "delta {} of base checkpoint {}",
                    expected, checkpoint.id
                )));
            }
        }
        let reached = checkpoint.version_number + plan.deltas.len() as u64;
        if reached != version {
            warn!(base = %checkpoint.id, reached, version, "replay stops short of target");
            return Err(VersionGraphError::NotFound(format!(
                "delta at version {} of base checkpoint {}",
                reached + 1,
                checkpoint.id
            )));
        }

        let mut state = self.codec.decode(&checkpoint.data).map_err(|e| {
            warn!(checkpoint = %checkpoint.id, error = %e, "checkpoint failed to decode");
            VersionGraphError::Corruption {
                node: checkpoint.id,
                reason: e.to_string(),
            }
        })?;

        let yield_every = self.config.replay_yield_interval.max(1);
        for (i, delta) in plan.deltas.iter().enumerate() {
            state = apply_owned(state, &delta.changeset).map_err(|e| {
                warn!(delta = %delta.id, error = %e, "stored delta failed to replay");
                VersionGraphError::Corruption {
                    node: delta.id,
                    reason: e.to_string(),
                }
            })?;
            if (i + 1) % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CheckpointDraft;
    use crate::config::VersionGraphConfig;
    use cadversion_core::{apply, CborCodec, PatchOp, Pointer, SchemaVersion, Value};
    use cadversion_store::{MemoryStore, WriteBatch};

    fn base_doc() -> Value {
        Value::from_entries([("count", Value::from(0)), ("name", Value::from("plan"))])
    }

    fn bump(n: i64) -> Vec<PatchOp> {
        vec![PatchOp::replace(Pointer::parse("/count").unwrap(), n)]
    }

    async fn setup() -> (VersionGraph<MemoryStore>, VersionChain) {
        let graph = VersionGraph::new(MemoryStore::new(), VersionGraphConfig::default());
        let chain = graph
            .create_chain(
                SchemaVersion(1),
                CheckpointDraft::new(SchemaVersion(1), CborCodec.encode(&base_doc()).unwrap()),
            )
            .await
            .unwrap();
        (graph, chain)
    }

    #[tokio::test]
    async fn test_replays_deltas_up_to_target() {
        let (graph, chain) = setup().await;
        let root = chain.root_checkpoint_id;
        let d1 = graph
            .create_delta(Some(root), &root, &chain.id, bump(1), "d1")
            .await
            .unwrap();
        graph
            .create_delta(Some(d1.id), &root, &chain.id, bump(2), "d2")
            .await
            .unwrap();

        let v2 = graph.get_state_at(&chain.id, 2).await.unwrap();
        assert_eq!(v2, apply(&base_doc(), &bump(1)).unwrap());
        let v3 = graph.get_state_at(&chain.id, 3).await.unwrap();
        assert_eq!(v3.get("count"), Some(&Value::from(2)));
        assert_eq!(graph.current_state().await.unwrap(), v3);
    }

    #[tokio::test]
    async fn test_beyond_history_is_version_not_found() {
        let (graph, chain) = setup().await;
        assert!(matches!(
            graph.get_state_at(&chain.id, 5).await,
            Err(VersionGraphError::VersionNotFound(5))
        ));
        assert!(matches!(
            graph.get_state_at(&chain.id, 0).await,
            Err(VersionGraphError::VersionNotFound(0))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let graph = VersionGraph::new(MemoryStore::new(), VersionGraphConfig::default());
        let chain = graph
            .create_chain(
                SchemaVersion(1),
                CheckpointDraft::new(SchemaVersion(1), vec![0xa1u8, 0x61]),
            )
            .await
            .unwrap();

        let err = graph.get_state_at(&chain.id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            VersionGraphError::Corruption { node, .. } if node == chain.root_checkpoint_id
        ));
    }

    #[tokio::test]
    async fn test_raw_deletion_surfaces_as_not_found() {
        let (graph, chain) = setup().await;
        let root = chain.root_checkpoint_id;
        let d1 = graph
            .create_delta(Some(root), &root, &chain.id, bump(1), "d1")
            .await
            .unwrap();
        graph
            .create_delta(Some(d1.id), &root, &chain.id, bump(2), "d2")
            .await
            .unwrap();

        graph
            .store()
            .apply(WriteBatch::new().delete_delta(d1.id))
            .await
            .unwrap();

        assert!(matches!(
            graph.get_state_at(&chain.id, 3).await,
            Err(VersionGraphError::NotFound(_))
        ));
        assert!(matches!(
            graph.get_state_at(&chain.id, 2).await,
            Err(VersionGraphError::VersionNotFound(2))
        ));
    }

    #[tokio::test]
    async fn test_truncation_between_resolve_and_replay() {
        let (graph, chain) = setup().await;
        let root = chain.root_checkpoint_id;
        let d1 = graph
            .create_delta(Some(root), &root, &chain.id, bump(1), "d1")
            .await
            .unwrap();
        graph
            .create_delta(Some(d1.id), &root, &chain.id, bump(2), "d2")
            .await
            .unwrap();

        let owner = graph.chain_for_version(3).await.unwrap().unwrap();
        graph.truncate_tip().await.unwrap();

        assert!(matches!(
            graph.replay(&owner, 3).await,
            Err(VersionGraphError::VersionNotFound(3))
        ));
        assert!(matches!(
            graph.get_state_at(&chain.id, 3).await,
            Err(VersionGraphError::VersionNotFound(3))
        ));
        let v2 = graph.replay(&owner, 2).await.unwrap();
        assert_eq!(v2.get("count"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn test_deadline() {
        let (graph, chain) = setup().await;
        let state = graph
            .get_state_at_with_deadline(&chain.id, 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(state, base_doc());

        let err = graph
            .get_state_at_with_deadline(&chain.id, 1, Duration::ZERO)
            .await;
        // A zero deadline may still win the race against an in-memory store.
        assert!(matches!(
            err,
            Ok(_) | Err(VersionGraphError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_unconnected_era_is_incompatible() {
        let (graph, first) = setup().await;
        let second = graph
            .create_chain(
                SchemaVersion(2),
                CheckpointDraft::new(SchemaVersion(2), CborCodec.encode(&base_doc()).unwrap()),
            )
            .await
            .unwrap();

        let err = graph.get_state_at(&first.id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            VersionGraphError::SchemaIncompatible { from, to }
                if from == SchemaVersion(1) && to == SchemaVersion(2)
        ));
        assert!(graph.get_state_at(&second.id, 2).await.is_ok());
        assert!(graph.get_state_at_version(1).await.is_ok());
    }
}
