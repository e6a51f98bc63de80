//! # CAD Version Testkit
//!
//! Testing utilities for the CAD version graph.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Sample drawings, edit changesets and a store-level fixture
//! - **Generators**: Proptest strategies for documents and edit scripts
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cadversion_core::apply;
//! use cadversion_testkit::EditScript;
//!
//! proptest! {
//!     #[test]
//!     fn replay_reaches_last_state(script: EditScript) {
//!         let mut state = script.initial.clone();
//!         for ops in &script.changesets {
//!             state = apply(&state, ops).unwrap();
//!         }
//!         prop_assert_eq!(&state, script.last());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use cadversion_testkit::fixtures::{sample_drawing, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let (chain, root) = fixture.make_root(1, &sample_drawing());
//! assert_eq!(chain.root_checkpoint_id, root.id);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{sample_drawing, TestFixture};
pub use generators::{document, edit_script, value, EditScript};
