//! Graph store contract.
//!
//! The annotation service talks to the graph database only through
//! [`GraphStore`]. A store executes batches of [`Statement`]s atomically and
//! hands back an opaque [`Bookmark`]; reads accept bookmarks so a caller can
//! observe its own earlier writes.
//!
//! # Error Modes and Guarantees
//!
//! | Operation | Guarantee | Empty Result |
//! |-----------|-----------|--------------|
//! | `write_batch` | All statements commit or none do | n/a |
//! | `read` | Sees at least the state of every supplied bookmark | `StoreError::NoResults` |
//! | `verify_connectivity` | No data access | n/a |
//! | `ensure_constraints` | Idempotent | n/a |

use crate::storage::statement::Statement;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One projected result row, keyed by column alias.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque causal-consistency token returned by a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmark(String);

impl Bookmark {
    /// Wraps a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts an optional header value into a bookmark, ignoring blanks.
    #[must_use]
    pub fn from_optional(token: Option<&str>) -> Option<Self> {
        token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutation counters for one executed statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementSummary {
    /// Relationships removed.
    pub relationships_deleted: u64,
    /// Relationships created.
    pub relationships_created: u64,
    /// Nodes created.
    pub nodes_created: u64,
    /// Properties written.
    pub properties_set: u64,
}

/// Result of a committed batch.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Token identifying the commit.
    pub bookmark: Bookmark,
    /// One entry per statement; `Some` only where a summary was requested.
    pub summaries: Vec<Option<StatementSummary>>,
}

/// Store adapter failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The read produced no rows.
    #[error("no results found")]
    NoResults,

    /// The database driver failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored property bag could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bookmark was not issued by this store.
    #[error("invalid bookmark: {0}")]
    InvalidBookmark(String),

    /// The bookmark refers to a commit the store has not seen.
    #[error("bookmark at commit {requested} not reached, latest commit is {latest}")]
    BookmarkNotReached {
        /// Commit sequence the bookmark names.
        requested: i64,
        /// Latest commit sequence in the store.
        latest: i64,
    },

    /// The store cannot execute this kind of statement in this context.
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    /// The connection lock was poisoned by a panicking thread.
    #[error("store connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Returns true for the "no rows" signal.
    #[must_use]
    pub const fn is_no_results(&self) -> bool {
        matches!(self, Self::NoResults)
    }
}

/// Trait for graph store adapters.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn GraphStore>`
/// - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
/// - `write_batch` must roll back every statement if any one fails
/// - `read` must return [`StoreError::NoResults`] rather than an empty list
pub trait GraphStore: Send + Sync {
    /// Executes statements as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is committed then.
    fn write_batch(&self, statements: &[Statement]) -> Result<WriteOutcome, StoreError>;

    /// Executes a read statement at least as fresh as every bookmark.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoResults`] for an empty result, or another
    /// variant if the bookmarks are unusable or the query fails.
    fn read(&self, statement: &Statement, bookmarks: &[Bookmark]) -> Result<Vec<Row>, StoreError>;

    /// Checks that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn verify_connectivity(&self) -> Result<(), StoreError>;

    /// Ensures node identifiers are unique.
    ///
    /// # Errors
    ///
    /// Returns an error if the constraint cannot be created.
    fn ensure_constraints(&self) -> Result<(), StoreError>;
}
