//! Storage backend traits.

mod graph;

pub use graph::{Bookmark, GraphStore, Row, StatementSummary, StoreError, WriteOutcome};
