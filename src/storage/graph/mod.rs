//! Graph store backends.
//!
//! # Available Backends
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | [`SqliteGraphStore`] | Default; embedded | Property graph over tables, commit-sequence bookmarks |
//!
//! # Example
//!
//! ```rust,ignore
//! use annotations_rw::storage::graph::SqliteGraphStore;
//! use annotations_rw::storage::GraphStore;
//!
//! let store = SqliteGraphStore::open("annotations.db")?;
//! store.ensure_constraints()?;
//! store.verify_connectivity()?;
//! ```

mod sqlite;

pub use sqlite::SqliteGraphStore;
