//! Editing facade: the document-level API an editor drives.
//!
//! Callers hand over changesets; the compaction policy decides whether each
//! edit is stored as a delta or as a fresh checkpoint.

use tracing::debug;

use cadversion_core::{
    apply_owned, CheckpointBuilder, Checkpoint, DeltaBuilder, Document, DocumentCodec, NextNode,
    Node, PatchOp, SchemaVersion, VersionChain,
};
use cadversion_store::Store;

use crate::chain::CheckpointDraft;
use crate::error::{Result, VersionGraphError};
use crate::graph::{now_millis, VersionGraph};

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Create the first chain from `document`.
    pub async fn initialize(
        &self,
        document: &Document,
        schema_version: SchemaVersion,
        description: &str,
    ) -> Result<VersionChain> {
        let _writer = self.writer.lock().await;
        let head = self.head().await?;
        if head.is_initialized() {
            return Err(VersionGraphError::AlreadyInitialized);
        }
        let data = self.codec.encode(document)?;
        let draft = CheckpointDraft::new(schema_version, data).description(description);
        self.start_chain_locked(&head, draft).await
    }

    /// Record one edit on top of the tip.
    pub async fn record_edit(&self, changeset: Vec<PatchOp>, description: &str) -> Result<Node> {
        let _writer = self.writer.lock().await;
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
        self.ensure_writable(&chain).await?;

        let base = self
            .store
            .latest_checkpoint(&chain.id, head.current_version)
            .await?
            .ok_or_else(|| VersionGraphError::NotFound(format!("checkpoints of chain {}", chain.id)))?;
        let run = self.store.delta_run(&chain.id, &base.id).await?;
        let next = self.config.compaction.decide(run.count, run.total_bytes);
        debug!(
            deltas = run.count,
            delta_bytes = run.total_bytes,
            next = ?next,
            "compaction decision"
        );

        let node: Node = match next {
            NextNode::Checkpoint => {
                let state = self.replay(&chain, head.current_version).await?;
                let state = apply_owned(state, &changeset)?;
                let data = self.codec.encode(&state)?;
                CheckpointBuilder::new(chain.id, head.next_version(), chain.schema_version, data)
                    .parent(Some(tip))
                    .timestamp(now_millis())
                    .description(description)
                    .build()
                    .into()
            }
            NextNode::Delta => DeltaBuilder::new(
                chain.id,
                base.id,
                run.max_sequence + 1,
                head.next_version(),
                chain.schema_version,
                changeset,
            )
            .parent(Some(tip))
            .timestamp(now_millis())
            .description(description)
            .build()
            .into(),
        };

        self.append_locked(&head, node.clone()).await?;
        Ok(node)
    }

    /// Manual save: checkpoint the current state and mark it as the user's
    /// save point.
    pub async fn save(&self, description: &str) -> Result<Checkpoint> {
        let _writer = self.writer.lock().await;
        self.snapshot_tip_locked(description, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersionGraphConfig;
    use cadversion_core::{encode_changeset, CompactionPolicy, NodeKind, Pointer, Value};
    use cadversion_store::MemoryStore;

    fn drawing() -> Value {
        Value::from_entries([
            ("units", Value::from("mm")),
            ("elements", Value::Array(Vec::new())),
        ])
    }

    fn add_line(index: usize) -> Vec<PatchOp> {
        vec![PatchOp::add(
            Pointer::parse(&format!("/elements/{}", index)).unwrap(),
            Value::from_entries([("kind", Value::from("line")), ("len", Value::from(index as i64))]),
        )]
    }

    fn graph(policy: CompactionPolicy) -> VersionGraph<MemoryStore> {
        VersionGraph::new(
            MemoryStore::new(),
            VersionGraphConfig {
                compaction: policy,
                ..VersionGraphConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_twice() {
        let graph = graph(CompactionPolicy::default());
        graph.initialize(&drawing(), SchemaVersion(1), "new drawing").await.unwrap();
        assert!(matches!(
            graph.initialize(&drawing(), SchemaVersion(1), "again").await,
            Err(VersionGraphError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_edit_before_initialize() {
        let graph = graph(CompactionPolicy::default());
        assert!(matches!(
            graph.record_edit(add_line(0), "x").await,
            Err(VersionGraphError::NotInitialized)
        ));
        assert!(matches!(
            graph.current_state().await,
            Err(VersionGraphError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_compaction_forces_checkpoint() {
        let graph = graph(CompactionPolicy {
            max_deltas: 2,
            ..CompactionPolicy::never_checkpoint()
        });
        graph.initialize(&drawing(), SchemaVersion(1), "new").await.unwrap();

        let kinds: Vec<NodeKind> = {
            let mut kinds = Vec::new();
            for i in 0..5 {
                kinds.push(graph.record_edit(add_line(i), "line").await.unwrap().kind());
            }
            kinds
        };
        // Two deltas on the root do not exceed the limit; three do.
        assert_eq!(
            kinds,
            [
                NodeKind::Delta,
                NodeKind::Delta,
                NodeKind::Delta,
                NodeKind::Checkpoint,
                NodeKind::Delta,
            ]
        );

        let state = graph.current_state().await.unwrap();
        assert_eq!(state.get("elements").and_then(Value::as_array).map(Vec::len), Some(5));
    }

    #[tokio::test]
    async fn test_size_threshold_forces_checkpoint() {
        // Every add_line(i) for a single-digit i encodes to the same length.
        let edit_bytes = encode_changeset(&add_line(0)).len() as u64;
        let graph = graph(CompactionPolicy {
            max_delta_bytes: 2 * edit_bytes,
            ..CompactionPolicy::never_checkpoint()
        });
        graph.initialize(&drawing(), SchemaVersion(1), "new").await.unwrap();

        let mut nodes = Vec::new();
        for i in 0..5 {
            nodes.push(graph.record_edit(add_line(i), "line").await.unwrap());
        }
        let kinds: Vec<NodeKind> = nodes.iter().map(Node::kind).collect();
        assert_eq!(
            kinds,
            [
                NodeKind::Delta,
                NodeKind::Delta,
                NodeKind::Delta,
                NodeKind::Checkpoint,
                NodeKind::Delta,
            ]
        );
        assert!(nodes[..3].iter().all(|n| n.size_bytes() == edit_bytes));

        // The run on the root stopped once it passed the limit.
        let chain = graph.list_chains().await.unwrap().remove(0);
        let run = graph
            .store()
            .delta_run(&chain.id, &chain.root_checkpoint_id)
            .await
            .unwrap();
        assert_eq!(run.count, 3);
        assert_eq!(run.total_bytes, 3 * edit_bytes);

        let checkpoint = &nodes[3];
        assert_eq!(checkpoint.version_number(), 5);
        let state = graph.get_state_at_version(5).await.unwrap();
        assert_eq!(state.get("elements").and_then(Value::as_array).map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_invalid_edit_is_rejected_on_both_paths() {
        let bad = vec![PatchOp::remove(Pointer::parse("/elements/3").unwrap())];

        let deltas = graph(CompactionPolicy::never_checkpoint());
        deltas.initialize(&drawing(), SchemaVersion(1), "new").await.unwrap();
        let err = deltas.record_edit(bad.clone(), "bad").await.unwrap_err();
        assert!(err.is_path_not_found());

        let checkpoints = graph(CompactionPolicy::always_checkpoint());
        checkpoints.initialize(&drawing(), SchemaVersion(1), "new").await.unwrap();
        let err = checkpoints.record_edit(bad, "bad").await.unwrap_err();
        assert!(err.is_path_not_found());
        assert_eq!(checkpoints.head().await.unwrap().current_version, 1);
    }

    #[tokio::test]
    async fn test_save_marks_user_checkpoint() {
        let graph = graph(CompactionPolicy::never_checkpoint());
        graph.initialize(&drawing(), SchemaVersion(1), "new").await.unwrap();
        graph.record_edit(add_line(0), "line").await.unwrap();

        let saved = graph.save("saved by user").await.unwrap();
        assert!(saved.is_manual_save);
        assert_eq!(saved.version_number, 3);

        let head = graph.head().await.unwrap();
        assert_eq!(head.user_checkpoint_version_id, Some(saved.id));
        assert_eq!(
            graph.get_state_at_version(3).await.unwrap(),
            graph.get_state_at_version(2).await.unwrap()
        );
    }
}
