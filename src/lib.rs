//! # annotations-rw
//!
//! Read/write service for content annotations.
//!
//! An annotation links a piece of content to a concept with a typed
//! relationship ("mentions", "about", "hasAuthor", ...) plus provenance:
//! relevance and confidence scores, the annotating agent and the time of
//! annotation. Annotations are partitioned by a *lifecycle* tag so several
//! independent annotation sets can live on the same content.
//!
//! ## Features
//!
//! - Replace-all-for-scope writes: one atomic batch deletes every
//!   relationship of a `(content, lifecycle)` scope and re-creates the new set
//! - Bookmark-based causal consistency between writes and later reads
//! - Closed predicate vocabulary mapped to graph relationship types
//! - HTTP surface, queue ingestion and optional forwarding of written sets
//!
//! ## Example
//!
//! ```rust,ignore
//! use annotations_rw::services::AnnotationsService;
//! use annotations_rw::storage::SqliteGraphStore;
//!
//! let store = SqliteGraphStore::open("annotations.db")?;
//! let service = AnnotationsService::new(Arc::new(store), settings)?;
//! let bookmark = service.write("content-uuid", "annotations-pac", "pac", &annotations)?;
//! let read = service.read("content-uuid", Some(&bookmark), "annotations-pac")?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod forwarder;
#[cfg(feature = "http")]
pub mod http;
pub mod models;
pub mod observability;
pub mod queue;
pub mod services;
pub mod storage;

pub use config::{LifecycleConfig, ServiceSettings};
pub use models::{Annotation, Annotations, PredicateTable, RelationType};
pub use services::AnnotationsService;
pub use storage::{Bookmark, GraphStore, SqliteGraphStore, StoreError};

/// Error type for annotation operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Validation` | Missing concept reference, empty content id, bad score or date |
/// | `UnsupportedPredicate` | Predicate outside the relationship vocabulary |
/// | `MalformedReference` | Concept or agent reference without a trailing UUID |
/// | `InvalidInput` | Unknown lifecycle, wrong content type, undecodable body |
/// | `Store` | Any store adapter failure other than "no results" |
/// | `OperationFailed` | Config loading, forwarding, server start-up |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Caller-supplied annotation data breaks a structural rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The predicate is not part of the relationship vocabulary.
    #[error("unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// A concept or agent reference does not end in a UUID.
    #[error("couldn't extract uuid from uri {0}")]
    MalformedReference(String),

    /// Input rejected before it reached the annotation core.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The graph store failed.
    ///
    /// Carries the operation name only; statement text never leaves the
    /// storage layer.
    #[error("{operation} failed: {source}")]
    Store {
        /// The service operation that hit the store.
        operation: &'static str,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// An ambient operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true when the error was caused by the caller's input.
    ///
    /// Callers use this to pick between "reject the request" and
    /// "report a system fault".
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnsupportedPredicate(_)
                | Self::MalformedReference(_)
                | Self::InvalidInput(_)
        )
    }

    /// Wraps a store error with the name of the failing operation.
    #[must_use]
    pub const fn store(operation: &'static str, source: StoreError) -> Self {
        Self::Store { operation, source }
    }
}

/// Result type alias for annotation operations.
pub type Result<T> = std::result::Result<T, Error>;
