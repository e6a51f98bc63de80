//! The version graph head: the single mutable record of the current tip.
//!
//! The head is a plain value. Every commit takes the current head, computes
//! the next one with [`VersionGraphHead::advance`], and persists both the
//! node and the new head in one transaction.

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::types::{NodeId, SchemaVersion};

/// Tip-of-history record.
///
/// The default value is the head of an empty document: no latest node,
/// version 0, nothing stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionGraphHead {
    pub current_version: u64,
    pub current_schema_version: SchemaVersion,
    /// Last checkpoint written by an explicit user save.
    pub user_checkpoint_version_id: Option<NodeId>,
    /// The most recently committed node.
    pub latest_version_id: Option<NodeId>,
    /// Sum of `size_bytes` over all retained nodes.
    pub total_size: u64,
}

impl VersionGraphHead {
    /// True once the first node has been committed.
    pub fn is_initialized(&self) -> bool {
        self.latest_version_id.is_some()
    }

    /// The version number the next committed node must carry.
    pub fn next_version(&self) -> u64 {
        self.current_version + 1
    }

    /// The head after committing `node`.
    pub fn advance(&self, node: &Node) -> Self {
        Self {
            current_version: node.version_number(),
            current_schema_version: node.schema_version(),
            user_checkpoint_version_id: if node.is_manual_save() {
                Some(node.id())
            } else {
                self.user_checkpoint_version_id
            },
            latest_version_id: Some(node.id()),
            total_size: self.total_size.saturating_add(node.size_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CheckpointBuilder, DeltaBuilder};
    use crate::types::ChainId;

    #[test]
    fn test_default_head_is_empty() {
        let head = VersionGraphHead::default();
        assert!(!head.is_initialized());
        assert_eq!(head.next_version(), 1);
        assert_eq!(head.total_size, 0);
    }

    #[test]
    fn test_advance_tracks_latest_and_size() {
        let chain = ChainId::derive(SchemaVersion(1), 1);
        let root = CheckpointBuilder::new(chain, 1, SchemaVersion(1), vec![0; 10]).build();
        let head = VersionGraphHead::default().advance(&Node::from(root.clone()));

        assert_eq!(head.current_version, 1);
        assert_eq!(head.latest_version_id, Some(root.id));
        assert_eq!(head.current_schema_version, SchemaVersion(1));
        assert_eq!(head.total_size, 10);
        assert_eq!(head.user_checkpoint_version_id, None);

        let delta = DeltaBuilder::new(chain, root.id, 1, 2, SchemaVersion(1), Vec::new())
            .parent(Some(root.id))
            .build();
        let next = head.advance(&Node::from(delta.clone()));
        assert_eq!(next.current_version, 2);
        assert_eq!(next.latest_version_id, Some(delta.id));
        assert_eq!(next.total_size, 10 + delta.size_bytes);
    }

    #[test]
    fn test_manual_save_moves_user_checkpoint() {
        let chain = ChainId::derive(SchemaVersion(1), 1);
        let root = CheckpointBuilder::new(chain, 1, SchemaVersion(1), vec![1]).build();
        let saved = CheckpointBuilder::new(chain, 2, SchemaVersion(1), vec![2])
            .parent(Some(root.id))
            .manual_save(true)
            .build();

        let head = VersionGraphHead::default()
            .advance(&Node::from(root))
            .advance(&Node::from(saved.clone()));
        assert_eq!(head.user_checkpoint_version_id, Some(saved.id));
    }
}
