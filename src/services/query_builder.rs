//! Statement construction for annotation scopes.
//!
//! Pure functions over validated input: nothing here touches the store.

use crate::models::{Annotation, PredicateTable, Scope, extract_uuid, predicate_key};
use crate::storage::{GraphOp, Statement};
use crate::Result;
use serde_json::{Map, Value, json};

const DELETE_SCOPED_CYPHER: &str = "OPTIONAL MATCH (:Thing{uuid:$contentID})-[r{lifecycle:$annotationLifecycle}]->(t:Thing)
DELETE r";

const READ_SCOPED_CYPHER: &str = "MATCH (c:Thing{uuid:$contentUUID})-[rel{lifecycle:$annotationLifecycle}]->(cc:Thing)
RETURN
    cc.uuid as id,
    cc.preflabel as prefLabel,
    labels(cc) as types,
    type(rel) as predicate,
    rel.relevanceScore as relevanceScore,
    rel.confidenceScore as confidenceScore,
    rel.annotatedBy as annotatedBy,
    rel.annotatedDate as annotatedDate,
    rel.annotatedDateEpoch as annotatedDateEpoch
ORDER BY id";

const COUNT_CYPHER: &str = "MATCH ()-[r{platformVersion:$platformVersion}]->()
WHERE r.lifecycle = $lifecycle
OR r.lifecycle IS NULL
RETURN count(r) as c";

fn merge_cypher(relation: &str) -> String {
    format!(
        "MERGE (content:Thing{{uuid:$contentID}})
MERGE (concept:Thing{{uuid:$conceptID}})
MERGE (content)-[pred:{relation} {{lifecycle:$annotationLifecycle}}]->(concept)
SET pred=$annProps"
    )
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Builds statements for annotation scopes.
///
/// Holds the predicate vocabulary it resolves relationship types against.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    relations: PredicateTable,
}

impl QueryBuilder {
    /// Creates a builder over a predicate vocabulary.
    #[must_use]
    pub const fn new(relations: PredicateTable) -> Self {
        Self { relations }
    }

    /// Returns the vocabulary.
    #[must_use]
    pub const fn relations(&self) -> &PredicateTable {
        &self.relations
    }

    /// Deletes every relationship of the scope.
    ///
    /// `include_summary` asks the store for the number of relationships removed.
    #[must_use]
    pub fn delete_statement(content_id: &str, lifecycle: &str, include_summary: bool) -> Statement {
        Statement::new(
            DELETE_SCOPED_CYPHER,
            object(json!({
                "contentID": content_id,
                "annotationLifecycle": lifecycle,
            })),
            GraphOp::DeleteScoped {
                content_id: content_id.to_string(),
                lifecycle: lifecycle.to_string(),
            },
        )
        .with_summary(include_summary)
    }

    /// Builds the replace-all batch for a scope: the scoped delete followed by
    /// one merge per annotation, in input order.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::UnsupportedPredicate`](crate::Error::UnsupportedPredicate)
    /// or [`Error::MalformedReference`](crate::Error::MalformedReference); no
    /// partial batch is returned.
    pub fn write_statements(&self, scope: &Scope, annotations: &[Annotation]) -> Result<Vec<Statement>> {
        let mut statements = Vec::with_capacity(annotations.len() + 1);
        statements.push(Self::delete_statement(&scope.content_id, &scope.lifecycle, false));
        for annotation in annotations {
            statements.push(self.annotation_statement(scope, annotation)?);
        }
        Ok(statements)
    }

    /// Builds the merge statement for one annotation.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference has no trailing UUID or the predicate is
    /// not in the vocabulary.
    pub fn annotation_statement(&self, scope: &Scope, annotation: &Annotation) -> Result<Statement> {
        let concept_id = extract_uuid(&annotation.concept_ref)?;
        let properties = annotation_properties(scope, annotation)?;
        let relation = self.relations.resolve(predicate_key(&annotation.predicate))?;

        let mut params = object(json!({
            "contentID": scope.content_id,
            "conceptID": concept_id,
            "annotationLifecycle": scope.lifecycle,
        }));
        params.insert("annProps".to_string(), Value::Object(properties.clone()));

        Ok(Statement::new(
            merge_cypher(relation.as_str()),
            params,
            GraphOp::MergeRelationship {
                from_id: scope.content_id.clone(),
                to_id: concept_id,
                relation,
                lifecycle: Some(scope.lifecycle.clone()),
                properties,
            },
        ))
    }

    /// Projects the scope's relationships, ordered by target identifier.
    #[must_use]
    pub fn read_statement(content_id: &str, lifecycle: &str) -> Statement {
        Statement::new(
            READ_SCOPED_CYPHER,
            object(json!({
                "contentUUID": content_id,
                "annotationLifecycle": lifecycle,
            })),
            GraphOp::ReadScoped {
                content_id: content_id.to_string(),
                lifecycle: lifecycle.to_string(),
            },
        )
    }

    /// Counts relationships for a platform version under `lifecycle`, plus
    /// relationships that carry no lifecycle at all.
    #[must_use]
    pub fn count_statement(lifecycle: &str, platform_version: &str) -> Statement {
        Statement::new(
            COUNT_CYPHER,
            object(json!({
                "platformVersion": platform_version,
                "lifecycle": lifecycle,
            })),
            GraphOp::CountRelationships {
                lifecycle: lifecycle.to_string(),
                platform_version: platform_version.to_string(),
            },
        )
    }
}

/// The full property bag for one relationship.
///
/// Optional fields appear only when supplied; an explicit zero score is kept.
fn annotation_properties(scope: &Scope, annotation: &Annotation) -> Result<Map<String, Value>> {
    let mut properties = Map::new();
    properties.insert(
        "platformVersion".to_string(),
        Value::String(scope.platform_version.clone()),
    );
    properties.insert("lifecycle".to_string(), Value::String(scope.lifecycle.clone()));

    if let Some(agent) = annotation.agent_ref.as_deref().filter(|agent| !agent.is_empty()) {
        properties.insert("annotatedBy".to_string(), Value::String(extract_uuid(agent)?));
    }
    if let Some(date) = annotation.annotated_at.as_deref().filter(|date| !date.is_empty()) {
        properties.insert("annotatedDate".to_string(), Value::String(date.to_string()));
        if let Some(epoch) = annotation.annotated_at_epoch {
            properties.insert("annotatedDateEpoch".to_string(), Value::from(epoch));
        }
    }
    if let Some(score) = annotation.relevance_score {
        properties.insert("relevanceScore".to_string(), Value::from(score));
    }
    if let Some(score) = annotation.confidence_score {
        properties.insert("confidenceScore".to_string(), Value::from(score));
    }

    Ok(properties)
}
