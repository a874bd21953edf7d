//! Predicate vocabulary and graph relationship types.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Predicate applied when an annotation carries none and defaulting is enabled.
pub const DEFAULT_PREDICATE: &str = "mentions";

/// The standard predicate vocabulary and the relationship type each maps to.
const STANDARD_RELATIONS: &[(&str, &str)] = &[
    ("mentions", "MENTIONS"),
    ("isClassifiedBy", "IS_CLASSIFIED_BY"),
    ("implicitlyClassifiedBy", "IMPLICITLY_CLASSIFIED_BY"),
    ("about", "ABOUT"),
    ("isPrimarilyClassifiedBy", "IS_PRIMARILY_CLASSIFIED_BY"),
    ("majorMentions", "MAJOR_MENTIONS"),
    ("hasAuthor", "HAS_AUTHOR"),
    ("hasContributor", "HAS_CONTRIBUTOR"),
    ("hasDisplayTag", "HAS_DISPLAY_TAG"),
    ("hasBrand", "HAS_BRAND"),
];

/// A graph relationship-type label such as `MENTIONS`.
///
/// Labels are interpolated into statement text, so construction only accepts
/// upper-case identifiers (`[A-Z][A-Z0-9_]*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationType(String);

impl RelationType {
    /// Creates a relationship type from a label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the label is not an upper-case identifier.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let mut chars = label.chars();
        let valid_head = chars.next().is_some_and(|c| c.is_ascii_uppercase());
        let valid_tail = chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if valid_head && valid_tail {
            Ok(Self(label))
        } else {
            Err(Error::InvalidInput(format!(
                "invalid relationship type label: {label}"
            )))
        }
    }

    /// Returns the label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable mapping from predicate names to relationship types.
///
/// Built once at start-up and handed to the query builder; lookups are exact
/// and case-sensitive.
#[derive(Debug, Clone)]
pub struct PredicateTable {
    relations: HashMap<String, RelationType>,
}

impl PredicateTable {
    /// Returns the standard annotation vocabulary.
    #[must_use]
    pub fn standard() -> Self {
        let relations = STANDARD_RELATIONS
            .iter()
            .map(|(predicate, label)| {
                (
                    (*predicate).to_string(),
                    RelationType((*label).to_string()),
                )
            })
            .collect();
        Self { relations }
    }

    /// Builds a table from `(predicate, relationship type)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a predicate is empty or a label is
    /// not a valid relationship type.
    pub fn from_entries<I, P, L>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, L)>,
        P: Into<String>,
        L: Into<String>,
    {
        let mut relations = HashMap::new();
        for (predicate, label) in entries {
            let predicate = predicate.into();
            if predicate.is_empty() {
                return Err(Error::InvalidInput("empty predicate in vocabulary".to_string()));
            }
            relations.insert(predicate, RelationType::new(label)?);
        }
        Ok(Self { relations })
    }

    /// Resolves a predicate to its relationship type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPredicate`] carrying the predicate when it is
    /// not in the vocabulary.
    pub fn resolve(&self, predicate: &str) -> Result<RelationType> {
        self.relations
            .get(predicate)
            .cloned()
            .ok_or_else(|| Error::UnsupportedPredicate(predicate.to_string()))
    }

    /// Returns true if the predicate is known.
    #[must_use]
    pub fn contains(&self, predicate: &str) -> bool {
        self.relations.contains_key(predicate)
    }

    /// Number of predicates in the vocabulary.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Returns true if the vocabulary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

impl Default for PredicateTable {
    fn default() -> Self {
        Self::standard()
    }
}
