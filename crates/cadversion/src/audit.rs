//! History listing and integrity audits.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{info, warn};

use cadversion_core::{ChainId, DocumentCodec, NodeId, NodeKind, NodeSummary};
use cadversion_store::Store;

use crate::error::Result;
use crate::graph::VersionGraph;

/// One inconsistency found by [`VersionGraph::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// The head's running total disagrees with the stored nodes.
    TotalSizeMismatch { recorded: u64, actual: u64 },
    /// The head points at a node that is not stored.
    DanglingHead(NodeId),
    /// The user save point is not a stored checkpoint.
    DanglingUserCheckpoint(NodeId),
    /// A delta's base checkpoint is not stored.
    DanglingBase { delta: NodeId, base: NodeId },
    /// A delta's base checkpoint belongs to another chain.
    CrossChainBase { delta: NodeId, base: NodeId },
    MissingRoot { chain: ChainId, root: NodeId },
    RootVersionMismatch {
        chain: ChainId,
        start_version: u64,
        root_version: u64,
    },
    /// A stored node's id does not match its content.
    IdMismatch(NodeId),
    /// Deltas on one base are not numbered 1..n.
    SequenceGap {
        base: NodeId,
        expected: u64,
        found: u64,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::TotalSizeMismatch { recorded, actual } => {
                write!(f, "head records {} bytes, nodes hold {}", recorded, actual)
            }
            IntegrityIssue::DanglingHead(id) => write!(f, "head points at missing node {}", id),
            IntegrityIssue::DanglingUserCheckpoint(id) => {
                write!(f, "user save point {} is missing", id)
            }
            IntegrityIssue::DanglingBase { delta, base } => {
                write!(f, "delta {} is based on missing checkpoint {}", delta, base)
            }
            IntegrityIssue::CrossChainBase { delta, base } => {
                write!(f, "delta {} is based on {} from another chain", delta, base)
            }
            IntegrityIssue::MissingRoot { chain, root } => {
                write!(f, "chain {} roots at missing checkpoint {}", chain, root)
            }
            IntegrityIssue::RootVersionMismatch {
                chain,
                start_version,
                root_version,
            } => write!(
                f,
                "chain {} starts at {} but its root is at {}",
                chain, start_version, root_version
            ),
            IntegrityIssue::IdMismatch(id) => write!(f, "node {} does not hash to its id", id),
            IntegrityIssue::SequenceGap {
                base,
                expected,
                found,
            } => write!(
                f,
                "deltas on {} jump from sequence {} to {}",
                base, expected, found
            ),
        }
    }
}

/// Result of an integrity audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub nodes_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

impl<S: Store, C: DocumentCodec> VersionGraph<S, C> {
    /// Every stored node in version order.
    pub async fn history(&self) -> Result<Vec<NodeSummary>> {
        Ok(self.store.list_node_summaries(None).await?)
    }

    /// Audit the stored graph without modifying it.
    pub async fn verify(&self) -> Result<IntegrityReport> {
        let head = self.head().await?;
        let summaries = self.store.list_node_summaries(None).await?;
        let chains = self.store.list_chains().await?;
        let by_id: HashMap<NodeId, &NodeSummary> = summaries.iter().map(|s| (s.id, s)).collect();
        let mut issues = Vec::new();

        let actual: u64 = summaries.iter().map(|s| s.size_bytes).sum();
        if actual != head.total_size {
            issues.push(IntegrityIssue::TotalSizeMismatch {
                recorded: head.total_size,
                actual,
            });
        }
        if let Some(latest) = head.latest_version_id {
            if !by_id.contains_key(&latest) {
                issues.push(IntegrityIssue::DanglingHead(latest));
            }
        }
        if let Some(saved) = head.user_checkpoint_version_id {
            if !by_id.get(&saved).is_some_and(|s| s.is_checkpoint()) {
                issues.push(IntegrityIssue::DanglingUserCheckpoint(saved));
            }
        }

        for chain in &chains {
            match by_id.get(&chain.root_checkpoint_id) {
                None => issues.push(IntegrityIssue::MissingRoot {
                    chain: chain.id,
                    root: chain.root_checkpoint_id,
                }),
                Some(root) if root.version_number != chain.start_version => {
                    issues.push(IntegrityIssue::RootVersionMismatch {
                        chain: chain.id,
                        start_version: chain.start_version,
                        root_version: root.version_number,
                    })
                }
                Some(_) => {}
            }
        }

        let mut runs: BTreeMap<(u64, NodeId), Vec<u64>> = BTreeMap::new();
        for s in summaries.iter().filter(|s| s.kind == NodeKind::Delta) {
            let (Some(base), Some(seq)) = (s.base_checkpoint_id, s.delta_sequence) else {
                continue;
            };
            match by_id.get(&base) {
                Some(b) if b.is_checkpoint() => {
                    if b.chain_id != s.chain_id {
                        issues.push(IntegrityIssue::CrossChainBase { delta: s.id, base });
                    }
                    runs.entry((b.version_number, base)).or_default().push(seq);
                }
                _ => issues.push(IntegrityIssue::DanglingBase { delta: s.id, base }),
            }
        }
        for ((_, base), mut seqs) in runs {
            seqs.sort_unstable();
            for (i, found) in seqs.into_iter().enumerate() {
                let expected = i as u64 + 1;
                if found != expected {
                    issues.push(IntegrityIssue::SequenceGap {
                        base,
                        expected,
                        found,
                    });
                    break;
                }
            }
        }

        for s in &summaries {
            let intact = match s.kind {
                NodeKind::Checkpoint => self
                    .store
                    .get_checkpoint(&s.id)
                    .await?
                    .is_some_and(|cp| cp.verify_id()),
                NodeKind::Delta => self
                    .store
                    .get_delta(&s.id)
                    .await?
                    .is_some_and(|d| d.verify_id()),
            };
            if !intact {
                issues.push(IntegrityIssue::IdMismatch(s.id));
            }
        }

        for issue in &issues {
            warn!(%issue, "integrity issue");
        }
        info!(
            nodes = summaries.len(),
            issues = issues.len(),
            "integrity audit finished"
        );
        Ok(IntegrityReport {
            nodes_checked: summaries.len(),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersionGraphConfig;
    use cadversion_core::{CompactionPolicy, PatchOp, Pointer, SchemaVersion, Value};
    use cadversion_store::{MemoryStore, WriteBatch};

    async fn graph() -> VersionGraph<MemoryStore> {
        let graph = VersionGraph::new(
            MemoryStore::new(),
            VersionGraphConfig {
                compaction: CompactionPolicy::never_checkpoint(),
                ..VersionGraphConfig::default()
            },
        );
        graph
            .initialize(
                &Value::from_entries([("count", Value::from(0))]),
                SchemaVersion(1),
                "new",
            )
            .await
            .unwrap();
        graph
    }

    fn set(n: i64) -> Vec<PatchOp> {
        vec![PatchOp::replace(Pointer::parse("/count").unwrap(), n)]
    }

    #[tokio::test]
    async fn test_history_is_ordered() {
        let graph = graph().await;
        graph.record_edit(set(1), "one").await.unwrap();
        graph.save("saved").await.unwrap();

        let history = graph.history().await.unwrap();
        let versions: Vec<u64> = history.iter().map(|s| s.version_number).collect();
        assert_eq!(versions, [1, 2, 3]);
        assert_eq!(history[1].kind, NodeKind::Delta);
        assert_eq!(history[1].description, "one");
        assert!(history[2].is_manual_save);
    }

    #[tokio::test]
    async fn test_clean_graph_verifies() {
        let graph = graph().await;
        graph.record_edit(set(1), "one").await.unwrap();
        graph.record_edit(set(2), "two").await.unwrap();

        let report = graph.verify().await.unwrap();
        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.nodes_checked, 3);
    }

    #[tokio::test]
    async fn test_raw_deletion_is_reported() {
        let graph = graph().await;
        let d1 = graph.record_edit(set(1), "one").await.unwrap();
        let d2 = graph.record_edit(set(2), "two").await.unwrap();
        graph
            .store()
            .apply(WriteBatch::new().delete_delta(d1.id()))
            .await
            .unwrap();

        let report = graph.verify().await.unwrap();
        assert!(!report.is_ok());
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::TotalSizeMismatch { .. })));
        assert!(report.issues.iter().any(|i| matches!(
            i,
            IntegrityIssue::SequenceGap { expected: 1, found: 2, .. }
        )));
        assert!(!report.issues.contains(&IntegrityIssue::DanglingHead(d2.id())));
    }
}
