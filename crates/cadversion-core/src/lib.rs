//! # CAD Version Core
//!
//! Pure primitives for the CAD document version graph: identifiers, the
//! materialized document value, the patch engine, and the node model.
//!
//! This crate contains no I/O, no storage, no async. Everything here is a
//! deterministic function of its inputs.
//!
//! ## Key Types
//!
//! - [`Value`] / [`Document`] - The closed value tree a document materializes to
//! - [`PatchOp`] - One step of a delta's changeset
//! - [`Checkpoint`], [`Delta`], [`Node`] - History nodes
//! - [`VersionChain`] - A run of history sharing one schema version
//! - [`VersionGraphHead`] - The tip-of-history record
//! - [`NodeId`], [`ChainId`], [`SchemaVersion`] - Strongly typed identifiers
//!
//! ## Canonicalization
//!
//! Values, changesets and node headers are encoded with deterministic CBOR.
//! See the [`canonical`] module.

pub mod canonical;
pub mod codec;
pub mod compaction;
pub mod diff;
pub mod error;
pub mod head;
pub mod node;
pub mod patch;
pub mod pointer;
pub mod types;
pub mod value;

pub use canonical::{canonical_value_bytes, decode_changeset, decode_value, encode_changeset};
pub use codec::{CborCodec, DocumentCodec};
pub use compaction::{CompactionPolicy, NextNode};
pub use diff::diff;
pub use error::{CoreError, PatchError};
pub use head::VersionGraphHead;
pub use node::{
    Checkpoint, CheckpointBuilder, Delta, DeltaBuilder, Node, NodeKind, NodeSummary,
    SchemaMigration, VersionChain,
};
pub use patch::{apply, apply_owned, PatchOp};
pub use pointer::Pointer;
pub use types::{ChainId, ContentHash, NodeId, SchemaVersion};
pub use value::{Document, Value};
