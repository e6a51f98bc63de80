//! Garbage collection and tip truncation.
//!
//! History is only ever removed from the tip, or wholesale by the collector
//! once nothing live can reach it.

use std::collections::{HashMap, HashSet};

use tracing::info;

use cadversion_core::{
    ChainId, DocumentCodec, NodeId, NodeKind, NodeSummary, VersionChain, VersionGraphHead,
};
use cadversion_store::{Store, WriteBatch};

use crate::error::{Result, VersionGraphError};
use crate::graph::VersionGraph;

/// What a garbage collection pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted_checkpoints: Vec<NodeId>,
    pub deleted_deltas: Vec<NodeId>,
    pub reclaimed_bytes: u64,
    /// Nodes still stored after the pass.
    pub retained: usize,
}

impl GcReport {
    pub fn deleted(&self) -> usize {
        self.deleted_checkpoints.len() + self.deleted_deltas.len()
    }
}

/// Reachability over one snapshot of node summaries.
struct Reachability<'a> {
    nodes: HashMap<NodeId, &'a NodeSummary>,
    /// Deltas grouped by `(chain, base)`, keyed to their sequence numbers.
    runs: HashMap<(ChainId, NodeId), Vec<(u64, NodeId)>>,
    /// New chain root -> boundary checkpoint it was migrated from.
    migrated_from: HashMap<NodeId, NodeId>,
}

impl<'a> Reachability<'a> {
    fn new(
        summaries: &'a [NodeSummary],
        chains: &[VersionChain],
        boundaries: &[NodeId],
    ) -> Self {
        let nodes: HashMap<NodeId, &NodeSummary> = summaries.iter().map(|s| (s.id, s)).collect();

        let mut runs: HashMap<(ChainId, NodeId), Vec<(u64, NodeId)>> = HashMap::new();
        for s in summaries {
            if let (Some(base), Some(seq)) = (s.base_checkpoint_id, s.delta_sequence) {
                runs.entry((s.chain_id, base)).or_default().push((seq, s.id));
            }
        }

        let mut migrated_from = HashMap::new();
        for boundary in boundaries {
            let Some(b) = nodes.get(boundary) else { continue };
            if let Some(chain) = chains
                .iter()
                .find(|c| c.start_version == b.version_number + 1)
            {
                migrated_from.insert(chain.root_checkpoint_id, b.id);
            }
        }

        Self {
            nodes,
            runs,
            migrated_from,
        }
    }

    fn edges(&self, node: &NodeSummary) -> Vec<NodeId> {
        let mut out = Vec::new();
        out.extend(node.parent_id);
        if let (Some(base), Some(seq)) = (node.base_checkpoint_id, node.delta_sequence) {
            out.push(base);
            if let Some(run) = self.runs.get(&(node.chain_id, base)) {
                out.extend(run.iter().filter(|(s, _)| *s < seq).map(|(_, id)| *id));
            }
        }
        out.extend(self.migrated_from.get(&node.id).copied());
        out
    }

    fn mark(&self, roots: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let mut live = HashSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else { continue };
            if live.insert(id) {
                stack.extend(self.edges(node));
            }
        }
        live
    }
}

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Delete every node that nothing live can reach.
    ///
    /// Live roots are the head's tip, the user save point, every chain root
    /// and every migration boundary. From those the collector follows
    /// parents, delta bases, earlier deltas on the same base and the link
    /// from a migrated chain's root back to its boundary.
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        if !head.is_initialized() {
            return Ok(GcReport::default());
        }

        let summaries = self.store.list_node_summaries(None).await?;
        let chains = self.store.list_chains().await?;
        let boundaries: Vec<NodeId> = self
            .store
            .list_migrations()
            .await?
            .into_iter()
            .map(|m| m.boundary_checkpoint_id)
            .collect();
        let reach = Reachability::new(&summaries, &chains, &boundaries);

        let roots = head
            .latest_version_id
            .into_iter()
            .chain(head.user_checkpoint_version_id)
            .chain(chains.iter().map(|c| c.root_checkpoint_id))
            .chain(boundaries.iter().copied());
        let mut live = reach.mark(roots);

        // A retained delta must keep its base and its predecessors, whatever
        // path kept it alive.
        loop {
            let orphaned: Vec<NodeId> = summaries
                .iter()
                .filter(|s| live.contains(&s.id))
                .flat_map(|s| reach.edges(s))
                .filter(|id| reach.nodes.contains_key(id) && !live.contains(id))
                .collect();
            if orphaned.is_empty() {
                break;
            }
            live.extend(reach.mark(orphaned));
        }

        let mut report = GcReport::default();
        let mut batch = WriteBatch::new();
        for s in summaries.iter().filter(|s| !live.contains(&s.id)) {
            report.reclaimed_bytes += s.size_bytes;
            match s.kind {
                NodeKind::Delta => report.deleted_deltas.push(s.id),
                NodeKind::Checkpoint => report.deleted_checkpoints.push(s.id),
            }
        }
        report.retained = summaries.len() - report.deleted();
        if report.deleted() == 0 {
            return Ok(report);
        }

        // Deltas first so no base disappears under a delta in the batch.
        for id in &report.deleted_deltas {
            batch = batch.delete_delta(*id);
        }
        for id in &report.deleted_checkpoints {
            batch = batch.delete_checkpoint(*id);
        }
        let next = VersionGraphHead {
            total_size: head.total_size.saturating_sub(report.reclaimed_bytes),
            ..head
        };
        self.store.apply(batch.put_head(next)).await?;

        info!(
            checkpoints = report.deleted_checkpoints.len(),
            deltas = report.deleted_deltas.len(),
            reclaimed_bytes = report.reclaimed_bytes,
            retained = report.retained,
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Delete the delta at the tip of history.
    ///
    /// Any other delta has successors replayed through it, so deleting it
    /// fails with `NonTipDeletion`.
    pub async fn delete_delta(&self, id: &NodeId) -> Result<VersionGraphHead> {
        let _writer = self.writer.lock().await;
        let head = self.initialized_head().await?;
        let delta = self.get_delta(id).await?;
        if head.latest_version_id != Some(delta.id) {
            return Err(VersionGraphError::NonTipDeletion(delta.id));
        }
        self.truncate_tip_locked(head).await
    }

    /// Remove the tip node and move the head back to its predecessor.
    ///
    /// Chain roots and schema boundaries cannot be truncated.
    pub async fn truncate_tip(&self) -> Result<VersionGraphHead> {
        let _writer = self.writer.lock().await;
        let head = self.initialized_head().await?;
        self.truncate_tip_locked(head).await
    }

    async fn truncate_tip_locked(&self, head: VersionGraphHead) -> Result<VersionGraphHead> {
        let tip_id = head
            .latest_version_id
            .ok_or(VersionGraphError::NotInitialized)?;
        let tip = self
            .store
            .get_node_summary(&tip_id)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("tip node {}", tip_id)))?;
        let chain = self.get_chain(&tip.chain_id).await?;

        if tip.id == chain.root_checkpoint_id {
            return Err(VersionGraphError::InvalidOperation(format!(
                "{} is the root of chain {}",
                tip.id, chain.id
            )));
        }
        if tip.is_schema_boundary {
            return Err(VersionGraphError::InvalidOperation(format!(
                "{} is a schema boundary",
                tip.id
            )));
        }

        let previous = self
            .store
            .node_at_version(&chain.id, tip.version_number - 1)
            .await?
            .ok_or(VersionGraphError::VersionNotFound(tip.version_number - 1))?;

        let user_checkpoint = if head.user_checkpoint_version_id == Some(tip.id) {
            self.store
                .list_node_summaries(None)
                .await?
                .into_iter()
                .filter(|s| {
                    s.is_checkpoint() && s.is_manual_save && s.version_number < tip.version_number
                })
                .last()
                .map(|s| s.id)
        } else {
            head.user_checkpoint_version_id
        };

        let next = VersionGraphHead {
            current_version: previous.version_number,
            current_schema_version: previous.schema_version,
            user_checkpoint_version_id: user_checkpoint,
            latest_version_id: Some(previous.id),
            total_size: head.total_size.saturating_sub(tip.size_bytes),
        };
        let batch = match tip.kind {
            NodeKind::Delta => WriteBatch::new().delete_delta(tip.id),
            NodeKind::Checkpoint => WriteBatch::new().delete_checkpoint(tip.id),
        };
        self.store.apply(batch.put_head(next.clone())).await?;

        info!(
            node = %tip.id,
            kind = tip.kind.as_str(),
            version = tip.version_number,
            "truncated tip"
        );
        Ok(next)
    }
}
