//! History nodes: checkpoints, deltas, and the records around them.
//!
//! A node is immutable once written. Its id is the Blake3 hash of a
//! canonical header that commits to the snapshot blob (checkpoint) or the
//! changeset (delta) through their hashes. The `is_schema_boundary` flag is
//! the one field that may be set after the fact, so it is left out of the
//! header and setting it never changes the node id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::{canonical_value_bytes, encode_changeset};
use crate::patch::PatchOp;
use crate::types::{ChainId, ContentHash, NodeId, SchemaVersion};
use crate::value::Value;

const NODE_ID_DOMAIN: &[u8] = b"cadversion-node-v0:";

/// Which kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Checkpoint,
    Delta,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Checkpoint => "checkpoint",
            NodeKind::Delta => "delta",
        }
    }
}

/// A contiguous run of history sharing one schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChain {
    pub id: ChainId,
    pub schema_version: SchemaVersion,
    /// Version number of the root checkpoint.
    pub start_version: u64,
    pub root_checkpoint_id: NodeId,
}

/// A full snapshot of the document at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: NodeId,
    /// The immediately preceding node in the same chain; `None` for a chain root.
    pub parent_id: Option<NodeId>,
    pub chain_id: ChainId,
    pub version_number: u64,
    pub schema_version: SchemaVersion,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub description: String,
    pub is_schema_boundary: bool,
    pub is_manual_save: bool,
    /// Codec-encoded document. Opaque to the version graph.
    pub data: Bytes,
    pub size_bytes: u64,
}

impl Checkpoint {
    /// Recompute the content address from the header fields.
    pub fn compute_id(&self) -> NodeId {
        let mut header = base_header(
            NodeKind::Checkpoint,
            self.parent_id,
            self.chain_id,
            self.version_number,
            self.schema_version,
            self.timestamp,
            &self.description,
        );
        header.insert("manual".into(), Value::Bool(self.is_manual_save));
        header.insert(
            "data".into(),
            Value::Bytes(ContentHash::hash(&self.data).0.to_vec()),
        );
        hash_header(header)
    }

    /// True when the stored id matches the content.
    pub fn verify_id(&self) -> bool {
        self.compute_id() == self.id
    }

    /// True when this checkpoint starts a chain.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// An ordered changeset relative to a base checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub base_checkpoint_id: NodeId,
    pub chain_id: ChainId,
    /// 1-based position among the deltas sharing `base_checkpoint_id`.
    pub delta_sequence: u64,
    pub version_number: u64,
    pub schema_version: SchemaVersion,
    pub timestamp: i64,
    pub description: String,
    pub changeset: Vec<PatchOp>,
    pub size_bytes: u64,
}

impl Delta {
    /// Recompute the content address from the header fields.
    pub fn compute_id(&self) -> NodeId {
        let mut header = base_header(
            NodeKind::Delta,
            self.parent_id,
            self.chain_id,
            self.version_number,
            self.schema_version,
            self.timestamp,
            &self.description,
        );
        header.insert(
            "base".into(),
            Value::Bytes(self.base_checkpoint_id.0.to_vec()),
        );
        header.insert("sequence".into(), Value::Integer(self.delta_sequence as i64));
        header.insert(
            "changeset".into(),
            Value::Bytes(ContentHash::hash(&encode_changeset(&self.changeset)).0.to_vec()),
        );
        hash_header(header)
    }

    pub fn verify_id(&self) -> bool {
        self.compute_id() == self.id
    }
}

fn base_header(
    kind: NodeKind,
    parent_id: Option<NodeId>,
    chain_id: ChainId,
    version_number: u64,
    schema_version: SchemaVersion,
    timestamp: i64,
    description: &str,
) -> BTreeMap<String, Value> {
    let mut header = BTreeMap::new();
    header.insert("kind".into(), Value::from(kind.as_str()));
    header.insert(
        "parent".into(),
        parent_id.map_or(Value::Null, |p| Value::Bytes(p.0.to_vec())),
    );
    header.insert("chain".into(), Value::Bytes(chain_id.0.to_vec()));
    header.insert("version".into(), Value::Integer(version_number as i64));
    header.insert("schema".into(), Value::Integer(i64::from(schema_version.0)));
    header.insert("timestamp".into(), Value::Integer(timestamp));
    header.insert("description".into(), Value::from(description));
    header
}

fn hash_header(header: BTreeMap<String, Value>) -> NodeId {
    let bytes = canonical_value_bytes(&Value::Map(header));
    NodeId(ContentHash::hash_with_domain(NODE_ID_DOMAIN, &bytes).0)
}

/// Builder for checkpoints. Computes `size_bytes` and the id.
#[derive(Debug)]
pub struct CheckpointBuilder {
    parent_id: Option<NodeId>,
    chain_id: ChainId,
    version_number: u64,
    schema_version: SchemaVersion,
    timestamp: i64,
    description: String,
    is_manual_save: bool,
    data: Bytes,
}

impl CheckpointBuilder {
    pub fn new(
        chain_id: ChainId,
        version_number: u64,
        schema_version: SchemaVersion,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            parent_id: None,
            chain_id,
            version_number,
            schema_version,
            timestamp: 0,
            description: String::new(),
            is_manual_save: false,
            data: data.into(),
        }
    }

    pub fn parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn manual_save(mut self, manual: bool) -> Self {
        self.is_manual_save = manual;
        self
    }

    pub fn build(self) -> Checkpoint {
        let mut checkpoint = Checkpoint {
            id: NodeId([0; 32]),
            parent_id: self.parent_id,
            chain_id: self.chain_id,
            version_number: self.version_number,
            schema_version: self.schema_version,
            timestamp: self.timestamp,
            description: self.description,
            is_schema_boundary: false,
            is_manual_save: self.is_manual_save,
            size_bytes: self.data.len() as u64,
            data: self.data,
        };
        checkpoint.id = checkpoint.compute_id();
        checkpoint
    }
}

/// Builder for deltas. `size_bytes` is the persisted changeset length.
#[derive(Debug)]
pub struct DeltaBuilder {
    parent_id: Option<NodeId>,
    base_checkpoint_id: NodeId,
    chain_id: ChainId,
    delta_sequence: u64,
    version_number: u64,
    schema_version: SchemaVersion,
    timestamp: i64,
    description: String,
    changeset: Vec<PatchOp>,
}

impl DeltaBuilder {
    pub fn new(
        chain_id: ChainId,
        base_checkpoint_id: NodeId,
        delta_sequence: u64,
        version_number: u64,
        schema_version: SchemaVersion,
        changeset: Vec<PatchOp>,
    ) -> Self {
        Self {
            parent_id: None,
            base_checkpoint_id,
            chain_id,
            delta_sequence,
            version_number,
            schema_version,
            timestamp: 0,
            description: String::new(),
            changeset,
        }
    }

    pub fn parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn build(self) -> Delta {
        let size_bytes = encode_changeset(&self.changeset).len() as u64;
        let mut delta = Delta {
            id: NodeId([0; 32]),
            parent_id: self.parent_id,
            base_checkpoint_id: self.base_checkpoint_id,
            chain_id: self.chain_id,
            delta_sequence: self.delta_sequence,
            version_number: self.version_number,
            schema_version: self.schema_version,
            timestamp: self.timestamp,
            description: self.description,
            changeset: self.changeset,
            size_bytes,
        };
        delta.id = delta.compute_id();
        delta
    }
}

/// Either kind of history node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Checkpoint(Checkpoint),
    Delta(Delta),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Checkpoint(_) => NodeKind::Checkpoint,
            Node::Delta(_) => NodeKind::Delta,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            Node::Checkpoint(c) => c.id,
            Node::Delta(d) => d.id,
        }
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        match self {
            Node::Checkpoint(c) => c.parent_id,
            Node::Delta(d) => d.parent_id,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            Node::Checkpoint(c) => c.chain_id,
            Node::Delta(d) => d.chain_id,
        }
    }

    pub fn version_number(&self) -> u64 {
        match self {
            Node::Checkpoint(c) => c.version_number,
            Node::Delta(d) => d.version_number,
        }
    }

    pub fn schema_version(&self) -> SchemaVersion {
        match self {
            Node::Checkpoint(c) => c.schema_version,
            Node::Delta(d) => d.schema_version,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Node::Checkpoint(c) => c.timestamp,
            Node::Delta(d) => d.timestamp,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Node::Checkpoint(c) => &c.description,
            Node::Delta(d) => &d.description,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            Node::Checkpoint(c) => c.size_bytes,
            Node::Delta(d) => d.size_bytes,
        }
    }

    /// Deltas are never manual saves.
    pub fn is_manual_save(&self) -> bool {
        matches!(self, Node::Checkpoint(c) if c.is_manual_save)
    }

    pub fn as_checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Node::Checkpoint(c) => Some(c),
            Node::Delta(_) => None,
        }
    }

    pub fn as_delta(&self) -> Option<&Delta> {
        match self {
            Node::Delta(d) => Some(d),
            Node::Checkpoint(_) => None,
        }
    }

    pub fn summary(&self) -> NodeSummary {
        match self {
            Node::Checkpoint(c) => NodeSummary::from(c),
            Node::Delta(d) => NodeSummary::from(d),
        }
    }
}

impl From<Checkpoint> for Node {
    fn from(checkpoint: Checkpoint) -> Self {
        Node::Checkpoint(checkpoint)
    }
}

impl From<Delta> for Node {
    fn from(delta: Delta) -> Self {
        Node::Delta(delta)
    }
}

/// Header-only view of a node, without the blob or changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    pub chain_id: ChainId,
    pub version_number: u64,
    pub schema_version: SchemaVersion,
    pub timestamp: i64,
    pub description: String,
    pub is_manual_save: bool,
    pub is_schema_boundary: bool,
    /// Set for deltas only.
    pub base_checkpoint_id: Option<NodeId>,
    /// Set for deltas only.
    pub delta_sequence: Option<u64>,
    pub size_bytes: u64,
}

impl NodeSummary {
    pub fn is_checkpoint(&self) -> bool {
        self.kind == NodeKind::Checkpoint
    }
}

impl From<&Checkpoint> for NodeSummary {
    fn from(c: &Checkpoint) -> Self {
        Self {
            id: c.id,
            kind: NodeKind::Checkpoint,
            parent_id: c.parent_id,
            chain_id: c.chain_id,
            version_number: c.version_number,
            schema_version: c.schema_version,
            timestamp: c.timestamp,
            description: c.description.clone(),
            is_manual_save: c.is_manual_save,
            is_schema_boundary: c.is_schema_boundary,
            base_checkpoint_id: None,
            delta_sequence: None,
            size_bytes: c.size_bytes,
        }
    }
}

impl From<&Delta> for NodeSummary {
    fn from(d: &Delta) -> Self {
        Self {
            id: d.id,
            kind: NodeKind::Delta,
            parent_id: d.parent_id,
            chain_id: d.chain_id,
            version_number: d.version_number,
            schema_version: d.schema_version,
            timestamp: d.timestamp,
            description: d.description.clone(),
            is_manual_save: false,
            is_schema_boundary: false,
            base_checkpoint_id: Some(d.base_checkpoint_id),
            delta_sequence: Some(d.delta_sequence),
            size_bytes: d.size_bytes,
        }
    }
}

/// A recorded schema transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMigration {
    pub from_schema_version: SchemaVersion,
    pub to_schema_version: SchemaVersion,
    pub migration_name: String,
    /// Textual source of the migration logic.
    pub migration_logic: String,
    pub applied_at: i64,
    /// Checkpoint in the old chain where the transition happened.
    pub boundary_checkpoint_id: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::Pointer;

    fn chain() -> ChainId {
        ChainId::derive(SchemaVersion(1), 1)
    }

    #[test]
    fn test_checkpoint_id_is_deterministic() {
        let a = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), vec![1, 2, 3])
            .timestamp(1000)
            .description("initial")
            .build();
        let b = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), vec![1, 2, 3])
            .timestamp(1000)
            .description("initial")
            .build();
        assert_eq!(a.id, b.id);
        assert!(a.verify_id());
        assert_eq!(a.size_bytes, 3);
    }

    #[test]
    fn test_checkpoint_id_commits_to_data() {
        let a = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), vec![1]).build();
        let b = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), vec![2]).build();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_schema_boundary_flag_does_not_change_id() {
        let mut cp = CheckpointBuilder::new(chain(), 3, SchemaVersion(1), vec![9]).build();
        let before = cp.id;
        cp.is_schema_boundary = true;
        assert_eq!(cp.compute_id(), before);
    }

    #[test]
    fn test_manual_flag_changes_id() {
        let a = CheckpointBuilder::new(chain(), 2, SchemaVersion(1), vec![0]).build();
        let b = CheckpointBuilder::new(chain(), 2, SchemaVersion(1), vec![0])
            .manual_save(true)
            .build();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_delta_id_commits_to_changeset() {
        let base = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), vec![0]).build();
        let ops_a = vec![PatchOp::replace(Pointer::parse("/units").unwrap(), "mm")];
        let ops_b = vec![PatchOp::replace(Pointer::parse("/units").unwrap(), "in")];

        let a = DeltaBuilder::new(chain(), base.id, 1, 2, SchemaVersion(1), ops_a.clone())
            .parent(Some(base.id))
            .build();
        let b = DeltaBuilder::new(chain(), base.id, 1, 2, SchemaVersion(1), ops_b)
            .parent(Some(base.id))
            .build();

        assert_ne!(a.id, b.id);
        assert!(a.verify_id());
        assert_eq!(a.size_bytes, encode_changeset(&ops_a).len() as u64);
    }

    #[test]
    fn test_checkpoint_and_delta_ids_are_distinct() {
        let cp = CheckpointBuilder::new(chain(), 1, SchemaVersion(1), Vec::new()).build();
        let d = DeltaBuilder::new(chain(), cp.id, 1, 1, SchemaVersion(1), Vec::new()).build();
        assert_ne!(cp.id, d.id);
    }

    #[test]
    fn test_node_accessors() {
        let cp = CheckpointBuilder::new(chain(), 4, SchemaVersion(2), vec![1])
            .manual_save(true)
            .description("save")
            .build();
        let node = Node::from(cp.clone());

        assert_eq!(node.kind(), NodeKind::Checkpoint);
        assert_eq!(node.id(), cp.id);
        assert_eq!(node.version_number(), 4);
        assert_eq!(node.schema_version(), SchemaVersion(2));
        assert!(node.is_manual_save());
        assert!(node.as_delta().is_none());

        let summary = node.summary();
        assert!(summary.is_checkpoint());
        assert_eq!(summary.base_checkpoint_id, None);
        assert_eq!(summary.size_bytes, 1);
    }
}
