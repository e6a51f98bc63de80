//! # CAD Version
//!
//! The version graph engine for a structured CAD document: every edit is
//! recorded as a full checkpoint or an incremental delta, any past version
//! can be reconstructed, and the document schema can evolve through
//! recorded migrations.
//!
//! ## Overview
//!
//! - **Chains**: Runs of history sharing one schema version. Only the newest
//!   chain accepts writes; older ones are sealed.
//! - **Checkpoints**: Immutable full snapshots, stored as opaque codec blobs.
//! - **Deltas**: Ordered patch operations on top of the chain's latest
//!   checkpoint.
//! - **Head**: The single mutable record of the current tip, advanced in the
//!   same transaction as every commit.
//!
//! ## Key Concepts
//!
//! - **Linear history**: A new node always extends the current tip.
//! - **Compaction**: The editing facade turns an edit into a checkpoint once
//!   the run of deltas since the last one gets too long or too large.
//! - **Schema boundary**: The checkpoint a migration starts from. It seals
//!   its chain; the migrated document roots the next one.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cadversion::{VersionGraph, VersionGraphConfig};
//! use cadversion::core::{PatchOp, Pointer, SchemaVersion, Value};
//! use cadversion::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("drawing.db").unwrap();
//!     let graph = VersionGraph::new(store, VersionGraphConfig::default());
//!
//!     let drawing = Value::from_entries([("elements", Value::Array(Vec::new()))]);
//!     graph
//!         .initialize(&drawing, SchemaVersion(1), "new drawing")
//!         .await
//!         .unwrap();
//!
//!     let line = Value::from_entries([("kind", Value::from("line"))]);
//!     graph
//!         .record_edit(
//!             vec![PatchOp::add(Pointer::parse("/elements/0").unwrap(), line)],
//!             "draw line",
//!         )
//!         .await
//!         .unwrap();
//!
//!     let first = graph.get_state_at_version(1).await.unwrap();
//!     assert_eq!(first, drawing);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `cadversion::core` - Values, the patch engine and the node model
//! - `cadversion::store` - Storage abstraction, SQLite and memory backends

pub mod audit;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod edit;
pub mod error;
pub mod gc;
pub mod graph;
pub mod migration;
pub mod reconstruct;

// Re-export component crates
pub use cadversion_core as core;
pub use cadversion_store as store;

// Re-export main types for convenience
pub use audit::{IntegrityIssue, IntegrityReport};
pub use chain::CheckpointDraft;
pub use config::VersionGraphConfig;
pub use error::{Result, VersionGraphError};
pub use gc::GcReport;
pub use graph::VersionGraph;
pub use migration::{FnMigration, MigrationLogic, PatchMigration};

// Re-export commonly used core types
pub use cadversion_core::{
    ChainId, Checkpoint, CompactionPolicy, Delta, Document, DocumentCodec, Node, NodeId,
    NodeKind, NodeSummary, PatchOp, Pointer, SchemaMigration, SchemaVersion, Value,
    VersionChain, VersionGraphHead,
};
