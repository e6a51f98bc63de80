//! # CAD Version Store
//!
//! Storage abstraction for the CAD version graph. Provides a trait-based
//! interface for chain, node, migration and head persistence with SQLite and
//! in-memory implementations.
//!
//! ## Overview
//!
//! The engine never writes through individual calls: every mutation is a
//! [`WriteBatch`] handed to [`Store::apply`], which commits it in one
//! transaction. Reads are plain lookups plus [`Store::load_replay_plan`],
//! which gathers everything reconstruction needs from one snapshot.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`WriteBatch`] / [`WriteOp`] - Atomic groups of writes
//! - [`ReplayPlan`] - Checkpoint plus deltas for one target version
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cadversion_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("drawing.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let head = store.get_head().await.unwrap();
//!     assert!(head.is_none());
//! }
//! ```

pub mod batch;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use batch::{WriteBatch, WriteOp};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DeltaRun, ReplayPlan, Store};
