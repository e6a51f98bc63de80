//! Test fixtures and helpers.
//!
//! Sample drawings, edit changesets, and a store-level fixture that writes
//! nodes without going through the engine's validation.

use cadversion_core::{
    CborCodec, ChainId, Checkpoint, CheckpointBuilder, Delta, DeltaBuilder, Document,
    DocumentCodec, Node, NodeId, PatchOp, Pointer, SchemaVersion, Value, VersionChain,
    VersionGraphHead,
};
use cadversion_store::{MemoryStore, Store, WriteBatch};

/// A line segment element.
pub fn line(x1: i64, y1: i64, x2: i64, y2: i64) -> Value {
    Value::from_entries([
        ("kind", Value::from("line")),
        ("layer", Value::from("0")),
        ("start", point(x1, y1)),
        ("end", point(x2, y2)),
    ])
}

/// A circle element.
pub fn circle(cx: i64, cy: i64, radius: f64) -> Value {
    Value::from_entries([
        ("kind", Value::from("circle")),
        ("layer", Value::from("0")),
        ("center", point(cx, cy)),
        ("radius", Value::from(radius)),
    ])
}

fn point(x: i64, y: i64) -> Value {
    Value::Array(vec![Value::from(x), Value::from(y)])
}

/// A small drawing: one layer, a line and a circle.
pub fn sample_drawing() -> Document {
    Value::from_entries([
        ("units", Value::from("mm")),
        (
            "layers",
            Value::Array(vec![Value::from_entries([
                ("name", Value::from("0")),
                ("visible", Value::from(true)),
            ])]),
        ),
        (
            "elements",
            Value::Array(vec![line(0, 0, 100, 0), circle(50, 50, 25.0)]),
        ),
    ])
}

fn path(s: &str) -> Pointer {
    Pointer::from_tokens(s.split('/').filter(|t| !t.is_empty()))
}

/// Insert `element` at `index` of the element list.
pub fn add_element(index: usize, element: Value) -> Vec<PatchOp> {
    vec![PatchOp::add(path(&format!("/elements/{}", index)), element)]
}

/// Remove the element at `index`.
pub fn remove_element(index: usize) -> Vec<PatchOp> {
    vec![PatchOp::remove(path(&format!("/elements/{}", index)))]
}

/// Move a line's start point.
pub fn move_start(index: usize, x: i64, y: i64) -> Vec<PatchOp> {
    vec![PatchOp::replace(
        path(&format!("/elements/{}/start", index)),
        point(x, y),
    )]
}

pub fn set_units(units: &str) -> Vec<PatchOp> {
    vec![PatchOp::replace(path("/units"), units)]
}

/// Writes chains and nodes straight into a [`MemoryStore`].
///
/// Nothing here checks chain membership, sequencing or staleness, which
/// makes it useful for building states the engine would refuse to produce.
pub struct TestFixture {
    pub store: MemoryStore,
    pub schema: SchemaVersion,
    pub codec: CborCodec,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_schema(SchemaVersion(1))
    }

    pub fn with_schema(schema: SchemaVersion) -> Self {
        Self {
            store: MemoryStore::new(),
            schema,
            codec: CborCodec,
        }
    }

    /// Build a chain starting at `start_version` and its root checkpoint.
    pub fn make_root(&self, start_version: u64, document: &Document) -> (VersionChain, Checkpoint) {
        let chain_id = ChainId::derive(self.schema, start_version);
        let root = CheckpointBuilder::new(chain_id, start_version, self.schema, self.encode(document))
            .timestamp(1_700_000_000_000)
            .description("root")
            .build();
        let chain = VersionChain {
            id: chain_id,
            schema_version: self.schema,
            start_version,
            root_checkpoint_id: root.id,
        };
        (chain, root)
    }

    pub fn make_checkpoint(
        &self,
        chain: &VersionChain,
        parent: NodeId,
        version: u64,
        document: &Document,
    ) -> Checkpoint {
        CheckpointBuilder::new(chain.id, version, chain.schema_version, self.encode(document))
            .parent(Some(parent))
            .timestamp(1_700_000_000_000 + version as i64)
            .build()
    }

    pub fn make_delta(
        &self,
        chain: &VersionChain,
        base: NodeId,
        sequence: u64,
        version: u64,
        parent: NodeId,
        ops: Vec<PatchOp>,
    ) -> Delta {
        DeltaBuilder::new(chain.id, base, sequence, version, chain.schema_version, ops)
            .parent(Some(parent))
            .timestamp(1_700_000_000_000 + version as i64)
            .build()
    }

    /// Store a chain with its root and advance the stored head.
    pub async fn put_chain(
        &self,
        chain: &VersionChain,
        root: &Checkpoint,
    ) -> cadversion_store::Result<VersionGraphHead> {
        self.write(WriteBatch::new().put_chain(chain.clone()), root.clone().into())
            .await
    }

    /// Store a node and advance the stored head past it.
    pub async fn put(&self, node: impl Into<Node>) -> cadversion_store::Result<VersionGraphHead> {
        self.write(WriteBatch::new(), node.into()).await
    }

    async fn write(
        &self,
        batch: WriteBatch,
        node: Node,
    ) -> cadversion_store::Result<VersionGraphHead> {
        let head = self.store.get_head().await?.unwrap_or_default().advance(&node);
        let batch = match node {
            Node::Checkpoint(cp) => batch.put_checkpoint(cp),
            Node::Delta(d) => batch.put_delta(d),
        };
        self.store.apply(batch.put_head(head.clone())).await?;
        Ok(head)
    }

    fn encode(&self, document: &Document) -> Vec<u8> {
        // The CBOR codec is total over `Value`.
        self.codec.encode(document).unwrap_or_default()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
