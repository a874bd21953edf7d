//! Annotation records.

use crate::{Error, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// One concept-to-content link with its provenance.
///
/// Serialized in the flat wire shape (`id`, `prefLabel`, `types`, `predicate`,
/// `relevanceScore`, `confidenceScore`, `annotatedBy`, `annotatedDate`,
/// `annotatedDateEpoch`). Absent optional fields are omitted rather than
/// written as nulls or zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Reference to the annotated concept.
    #[serde(rename = "id", default)]
    pub concept_ref: String,
    /// Display name of the concept, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pref_label: Option<String>,
    /// Type labels of the concept, when known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Predicate name, or the relationship type on reads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub predicate: String,
    /// Relevance score in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    /// Confidence score in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    /// Reference to the annotating agent.
    #[serde(
        rename = "annotatedBy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_ref: Option<String>,
    /// Annotation time as an RFC 3339 timestamp.
    #[serde(
        rename = "annotatedDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub annotated_at: Option<String>,
    /// Annotation time in seconds since the Unix epoch.
    #[serde(
        rename = "annotatedDateEpoch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub annotated_at_epoch: Option<i64>,
}

impl Annotation {
    /// Creates an annotation with a concept reference and predicate.
    #[must_use]
    pub fn new(concept_ref: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            concept_ref: concept_ref.into(),
            predicate: predicate.into(),
            ..Self::default()
        }
    }

    /// Sets the relevance score.
    #[must_use]
    pub const fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// Sets the confidence score.
    #[must_use]
    pub const fn with_confidence(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }

    /// Sets the annotating agent.
    #[must_use]
    pub fn with_agent(mut self, agent_ref: impl Into<String>) -> Self {
        self.agent_ref = Some(agent_ref.into());
        self
    }

    /// Sets the annotation time.
    #[must_use]
    pub fn with_annotated_at(mut self, timestamp: impl Into<String>) -> Self {
        self.annotated_at = Some(timestamp.into());
        self
    }

    /// Sets the concept display name.
    #[must_use]
    pub fn with_pref_label(mut self, label: impl Into<String>) -> Self {
        self.pref_label = Some(label.into());
        self
    }

    /// Checks scores and timestamp, deriving the epoch from the timestamp.
    ///
    /// An empty agent or timestamp counts as not supplied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a score is outside `[0, 1]` or the
    /// timestamp is not RFC 3339.
    pub fn normalize(mut self) -> Result<Self> {
        self.agent_ref = self.agent_ref.filter(|agent| !agent.is_empty());
        self.annotated_at = self.annotated_at.filter(|date| !date.is_empty());
        if self.annotated_at.is_none() {
            self.annotated_at_epoch = None;
        }

        for (name, score) in [
            ("relevanceScore", self.relevance_score),
            ("confidenceScore", self.confidence_score),
        ] {
            if let Some(value) = score
                && !(0.0..=1.0).contains(&value)
            {
                return Err(Error::Validation(format!(
                    "{name} {value} for concept {} is outside [0, 1]",
                    self.concept_ref
                )));
            }
        }

        if let Some(timestamp) = self.annotated_at.as_deref() {
            let parsed = DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
                Error::Validation(format!("annotatedDate '{timestamp}' is invalid: {e}"))
            })?;
            self.annotated_at_epoch = Some(parsed.timestamp());
        }

        Ok(self)
    }
}

/// All annotations of one content item under one lifecycle, in input order.
pub type Annotations = Vec<Annotation>;

/// The relationships a write or delete may touch.
///
/// Only `content_id` and `lifecycle` bound the scope; `platform_version` is
/// recorded on each relationship for counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Content identifier.
    pub content_id: String,
    /// Lifecycle tag.
    pub lifecycle: String,
    /// Platform version recorded on written relationships.
    pub platform_version: String,
}

impl Scope {
    /// Creates a scope.
    #[must_use]
    pub fn new(
        content_id: impl Into<String>,
        lifecycle: impl Into<String>,
        platform_version: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            lifecycle: lifecycle.into(),
            platform_version: platform_version.into(),
        }
    }
}
