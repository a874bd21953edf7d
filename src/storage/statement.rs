//! Statement descriptors.
//!
//! A [`Statement`] carries the Cypher text a Bolt-speaking backend would run,
//! its parameters, and the same operation in typed form for backends that do
//! not speak Cypher.

use crate::models::RelationType;
use serde_json::{Map, Value};

/// Typed form of a graph statement.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    /// Delete every relationship leaving `content_id` tagged with `lifecycle`.
    DeleteScoped {
        /// Content node identifier.
        content_id: String,
        /// Lifecycle tag.
        lifecycle: String,
    },
    /// Merge both nodes and a relationship, then replace its property bag.
    MergeRelationship {
        /// Source node identifier.
        from_id: String,
        /// Target node identifier.
        to_id: String,
        /// Relationship type.
        relation: RelationType,
        /// Lifecycle the relationship is matched on; `None` matches untagged ones.
        lifecycle: Option<String>,
        /// Complete property bag written onto the relationship.
        properties: Map<String, Value>,
    },
    /// Project every relationship leaving `content_id` tagged with `lifecycle`.
    ReadScoped {
        /// Content node identifier.
        content_id: String,
        /// Lifecycle tag.
        lifecycle: String,
    },
    /// Count relationships for a platform version, including untagged ones.
    CountRelationships {
        /// Lifecycle tag.
        lifecycle: String,
        /// Platform version.
        platform_version: String,
    },
}

impl GraphOp {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DeleteScoped { .. } => "delete_scoped",
            Self::MergeRelationship { .. } => "merge_relationship",
            Self::ReadScoped { .. } => "read_scoped",
            Self::CountRelationships { .. } => "count_relationships",
        }
    }

    /// Returns true if the operation mutates the graph.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::DeleteScoped { .. } | Self::MergeRelationship { .. }
        )
    }
}

/// A parameterized statement ready for a [`GraphStore`](crate::storage::GraphStore).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Cypher text.
    pub cypher: String,
    /// Named parameters referenced by the text.
    pub params: Map<String, Value>,
    /// Typed operation.
    pub op: GraphOp,
    /// Whether the store should report mutation counters.
    pub include_summary: bool,
}

impl Statement {
    /// Creates a statement without a summary request.
    #[must_use]
    pub fn new(cypher: impl Into<String>, params: Map<String, Value>, op: GraphOp) -> Self {
        Self {
            cypher: cypher.into(),
            params,
            op,
            include_summary: false,
        }
    }

    /// Requests mutation counters for this statement.
    #[must_use]
    pub const fn with_summary(mut self, include_summary: bool) -> Self {
        self.include_summary = include_summary;
        self
    }
}
