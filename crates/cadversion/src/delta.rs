//! Delta log operations.

use cadversion_core::{ChainId, Delta, DeltaBuilder, DocumentCodec, Node, NodeId, PatchOp};
use cadversion_store::Store;

use crate::error::{Result, VersionGraphError};
use crate::graph::{now_millis, VersionGraph};

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Append a delta at the next version of `chain_id`.
    ///
    /// The sequence number is one past the highest existing sequence for
    /// `(chain_id, base_checkpoint_id)`. The base must be a checkpoint of
    /// `chain_id` (`ChainMismatch` otherwise) and must be the chain's latest
    /// checkpoint (`StaleBaseCheckpoint` otherwise). When
    /// `validate_deltas_on_write` is set, the changeset is dry-run against
    /// the current state and a patch error rejects the delta.
    pub async fn create_delta(
        &self,
        parent_id: Option<NodeId>,
        base_checkpoint_id: &NodeId,
        chain_id: &ChainId,
        patch_ops: Vec<PatchOp>,
        description: &str,
    ) -> Result<Delta> {
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        let chain = self.get_chain(chain_id).await?;

        let base = self
            .store
            .get_node_summary(base_checkpoint_id)
            .await?
            .filter(|s| s.is_checkpoint())
            .ok_or_else(|| {
                VersionGraphError::NotFound(format!("base checkpoint {}", base_checkpoint_id))
            })?;
        if base.chain_id != chain.id {
            return Err(VersionGraphError::ChainMismatch {
                node: base.id,
                chain: chain.id,
            });
        }

        let run = self.store.delta_run(&chain.id, &base.id).await?;
        let delta = DeltaBuilder::new(
            chain.id,
            base.id,
            run.max_sequence + 1,
            head.next_version(),
            chain.schema_version,
            patch_ops,
        )
        .parent(parent_id)
        .timestamp(now_millis())
        .description(description)
        .build();

        self.append_locked(&head, Node::Delta(delta.clone())).await?;
        Ok(delta)
    }

    /// Deltas of `chain_id` based on `base_checkpoint_id`, in sequence order.
    pub async fn get_sequence(
        &self,
        chain_id: &ChainId,
        base_checkpoint_id: &NodeId,
    ) -> Result<Vec<Delta>> {
        Ok(self
            .store
            .get_delta_sequence(chain_id, base_checkpoint_id)
            .await?)
    }
}
