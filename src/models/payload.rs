//! Versioned decoders for inbound annotation payloads.
//!
//! Two wire shapes are accepted and both decode into [`Annotation`]:
//!
//! - **Flat**: `[{"id", "predicate", "relevanceScore", ...}]`, which is also
//!   the shape of every outbound read.
//! - **Provenance**: `[{"thing": {...}, "provenances": [{"scores", "agentRole", "atTime"}]}]`,
//!   where scores are keyed by scoring-system URI.

use super::{Annotation, Annotations};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

/// Scoring system URI for relevance scores.
pub const RELEVANCE_SCORING_SYSTEM: &str = "http://api.ft.com/scoringsystem/FT-RELEVANCE-SYSTEM";

/// Scoring system URI for confidence scores.
pub const CONFIDENCE_SCORING_SYSTEM: &str =
    "http://api.ft.com/scoringsystem/FT-CONFIDENCE-SYSTEM";

/// Wire shape of an annotation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSchema {
    /// Flat fields per annotation.
    Flat,
    /// Nested thing plus provenance list.
    Provenance,
}

impl PayloadSchema {
    /// Detects the schema of a payload.
    ///
    /// Any element carrying a `thing` object selects the provenance schema.
    #[must_use]
    pub fn detect(payload: &Value) -> Self {
        let nested = payload.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|item| item.get("thing").is_some_and(Value::is_object))
        });
        if nested { Self::Provenance } else { Self::Flat }
    }

    /// Returns the schema name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Provenance => "provenance",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThingRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    pref_label: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    predicate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Score {
    scoring_system: String,
    value: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Provenance {
    #[serde(default)]
    scores: Vec<Score>,
    #[serde(default)]
    agent_role: Option<String>,
    #[serde(default)]
    at_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProvenanceAnnotation {
    #[serde(default)]
    thing: ThingRef,
    #[serde(default)]
    provenances: Vec<Provenance>,
}

impl From<ProvenanceAnnotation> for Annotation {
    fn from(value: ProvenanceAnnotation) -> Self {
        let ThingRef {
            id,
            pref_label,
            types,
            predicate,
        } = value.thing;
        let mut annotation = Self {
            concept_ref: id,
            pref_label,
            types,
            predicate,
            ..Self::default()
        };

        if let Some(provenance) = value.provenances.into_iter().next() {
            for score in &provenance.scores {
                match score.scoring_system.as_str() {
                    RELEVANCE_SCORING_SYSTEM => annotation.relevance_score = Some(score.value),
                    CONFIDENCE_SCORING_SYSTEM => annotation.confidence_score = Some(score.value),
                    _ => {},
                }
            }
            annotation.agent_ref = provenance.agent_role.filter(|agent| !agent.is_empty());
            annotation.annotated_at = provenance.at_time.filter(|time| !time.is_empty());
        }

        annotation
    }
}

/// Decodes a payload, detecting its schema.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the payload is not a list or an element
/// does not match the detected schema.
pub fn decode_annotations(payload: Value) -> Result<Annotations> {
    let schema = PayloadSchema::detect(&payload);
    decode_with_schema(payload, schema)
}

/// Decodes a payload with an explicit schema.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the payload does not match the schema.
pub fn decode_with_schema(payload: Value, schema: PayloadSchema) -> Result<Annotations> {
    let invalid = |e: serde_json::Error| {
        Error::InvalidInput(format!("{} annotation payload: {e}", schema.as_str()))
    };
    match schema {
        PayloadSchema::Flat => serde_json::from_value::<Annotations>(payload).map_err(invalid),
        PayloadSchema::Provenance => serde_json::from_value::<Vec<ProvenanceAnnotation>>(payload)
            .map(|items| items.into_iter().map(Annotation::from).collect())
            .map_err(invalid),
    }
}
