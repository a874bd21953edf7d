//! Storage layer.
//!
//! - [`statement`]: statement descriptors (Cypher text, parameters, typed operation)
//! - [`traits`]: the [`GraphStore`] contract, bookmarks and store errors
//! - [`graph`]: concrete store backends

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod graph;
pub mod statement;
pub mod traits;

pub use graph::SqliteGraphStore;
pub use statement::{GraphOp, Statement};
pub use traits::{Bookmark, GraphStore, Row, StatementSummary, StoreError, WriteOutcome};
