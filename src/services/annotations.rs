//! Annotation write/read/delete orchestration.
//!
//! # Example
//!
//! ```rust,ignore
//! use annotations_rw::services::AnnotationsService;
//! use annotations_rw::storage::SqliteGraphStore;
//! use annotations_rw::ServiceSettings;
//!
//! let store = Arc::new(SqliteGraphStore::open("annotations.db")?);
//! let service = AnnotationsService::new(store, ServiceSettings::new("http://api.ft.com"))?;
//!
//! let bookmark = service.write(content_id, "annotations-pac", "pac", &annotations)?;
//! let read = service.read(content_id, Some(&bookmark), "annotations-pac")?;
//! let deleted = service.delete(content_id, "annotations-pac")?;
//! ```

use crate::config::ServiceSettings;
use crate::models::{Annotation, Annotations, Scope, thing_url};
use crate::services::query_builder::QueryBuilder;
use crate::storage::{Bookmark, GraphStore, Row, StoreError};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of a scoped delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Whether at least one relationship was removed.
    pub found: bool,
    /// Number of relationships removed.
    pub relationships_deleted: u64,
    /// Bookmark of the delete commit.
    pub bookmark: Bookmark,
}

/// Result of a scoped replace.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    /// Bookmark of the write commit.
    pub bookmark: Bookmark,
    /// The annotations as written, after predicate defaulting and normalization.
    pub annotations: Annotations,
}

/// Runs a store call and records its latency.
fn timed<T>(
    operation: &'static str,
    call: impl FnOnce() -> std::result::Result<T, StoreError>,
) -> std::result::Result<T, StoreError> {
    let start = Instant::now();
    let result = call();
    metrics::histogram!("annotations_store_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    result
}

/// Coordinates annotation scopes against a [`GraphStore`].
///
/// Holds no per-call state; one instance serves any number of concurrent
/// callers. Concurrent writes to the same scope are resolved by the store:
/// the last batch to commit wins.
#[derive(Clone)]
pub struct AnnotationsService {
    store: Arc<dyn GraphStore>,
    builder: QueryBuilder,
    public_api_url: String,
    allow_default_predicate: bool,
    default_predicate: String,
}

impl AnnotationsService {
    /// Creates a service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the public API URL is not absolute.
    pub fn new(store: Arc<dyn GraphStore>, settings: ServiceSettings) -> Result<Self> {
        reqwest::Url::parse(&settings.public_api_url).map_err(|e| {
            Error::InvalidInput(format!(
                "public api url '{}' is invalid: {e}",
                settings.public_api_url
            ))
        })?;

        Ok(Self {
            store,
            builder: QueryBuilder::new(settings.relations),
            public_api_url: settings.public_api_url,
            allow_default_predicate: settings.allow_default_predicate,
            default_predicate: settings.default_predicate,
        })
    }

    /// Returns the public API base URL.
    #[must_use]
    pub fn public_api_url(&self) -> &str {
        &self.public_api_url
    }

    /// Replaces every annotation of `(content_id, lifecycle)` with `annotations`.
    ///
    /// The scoped delete and one merge per annotation are submitted as one
    /// batch. Every annotation is checked before any statement is built, and
    /// every statement is built before the batch is submitted, so a bad
    /// member leaves the scope untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty content id, a missing concept
    ///   reference, a missing predicate (unless defaulting is enabled), an
    ///   out-of-range score or an unparseable date
    /// - [`Error::UnsupportedPredicate`] / [`Error::MalformedReference`]
    /// - [`Error::Store`] if the batch fails
    pub fn write(
        &self,
        content_id: &str,
        lifecycle: &str,
        platform_version: &str,
        annotations: &[Annotation],
    ) -> Result<Bookmark> {
        self.replace(content_id, lifecycle, platform_version, annotations)
            .map(|receipt| receipt.bookmark)
    }

    /// Same as [`write`](Self::write), also returning the annotations as written.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    #[instrument(
        skip_all,
        fields(content_id = %content_id, lifecycle = %lifecycle, annotation_count = annotations.len())
    )]
    pub fn replace(
        &self,
        content_id: &str,
        lifecycle: &str,
        platform_version: &str,
        annotations: &[Annotation],
    ) -> Result<WriteReceipt> {
        if content_id.is_empty() {
            return Err(Error::Validation("content uuid is required".to_string()));
        }

        let prepared = self.prepare(annotations)?;
        let scope = Scope::new(content_id, lifecycle, platform_version);
        let statements = self.builder.write_statements(&scope, &prepared)?;

        let outcome = timed("write", || self.store.write_batch(&statements)).map_err(|e| {
            metrics::counter!("annotations_write_failed_total").increment(1);
            Error::store("write annotations", e)
        })?;

        metrics::counter!("annotations_write_total").increment(1);
        tracing::info!(bookmark = %outcome.bookmark, "Wrote annotations");
        Ok(WriteReceipt {
            bookmark: outcome.bookmark,
            annotations: prepared,
        })
    }

    /// Reads the annotations of `(content_id, lifecycle)`.
    ///
    /// Returns `None` when the scope has no relationships. Concept and agent
    /// identifiers come back as public `/things/<uuid>` URLs, ordered by
    /// concept identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for any store failure other than "no results".
    #[instrument(skip_all, fields(content_id = %content_id, lifecycle = %lifecycle))]
    pub fn read(
        &self,
        content_id: &str,
        bookmark: Option<&Bookmark>,
        lifecycle: &str,
    ) -> Result<Option<Annotations>> {
        let statement = QueryBuilder::read_statement(content_id, lifecycle);
        let bookmarks: Vec<Bookmark> = bookmark.cloned().into_iter().collect();

        metrics::counter!("annotations_read_total").increment(1);
        match timed("read", || self.store.read(&statement, &bookmarks)) {
            Ok(rows) => rows
                .into_iter()
                .map(|row| self.to_public(row))
                .collect::<Result<Annotations>>()
                .map(Some),
            Err(StoreError::NoResults) => Ok(None),
            Err(e) => Err(Error::store("read annotations", e)),
        }
    }

    /// Deletes every annotation of `(content_id, lifecycle)`.
    ///
    /// Content and concept nodes are left in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the delete fails.
    #[instrument(skip_all, fields(content_id = %content_id, lifecycle = %lifecycle))]
    pub fn delete(&self, content_id: &str, lifecycle: &str) -> Result<DeleteOutcome> {
        let statement = QueryBuilder::delete_statement(content_id, lifecycle, true);
        let outcome = timed("delete", || {
            self.store.write_batch(std::slice::from_ref(&statement))
        })
        .map_err(|e| Error::store("delete annotations", e))?;

        let summary = outcome
            .summaries
            .first()
            .copied()
            .flatten()
            .ok_or_else(|| Error::OperationFailed {
                operation: "delete annotations".to_string(),
                cause: "store returned no mutation summary".to_string(),
            })?;

        metrics::counter!("annotations_delete_total").increment(1);
        tracing::info!(
            relationships_deleted = summary.relationships_deleted,
            bookmark = %outcome.bookmark,
            "Deleted annotations"
        );

        Ok(DeleteOutcome {
            found: summary.relationships_deleted > 0,
            relationships_deleted: summary.relationships_deleted,
            bookmark: outcome.bookmark,
        })
    }

    /// Counts relationships for a platform version under `lifecycle`.
    ///
    /// Relationships without any lifecycle are counted too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for any store failure other than "no results".
    #[instrument(skip(self, bookmark))]
    pub fn count(
        &self,
        lifecycle: &str,
        bookmark: Option<&Bookmark>,
        platform_version: &str,
    ) -> Result<u64> {
        let statement = QueryBuilder::count_statement(lifecycle, platform_version);
        let bookmarks: Vec<Bookmark> = bookmark.cloned().into_iter().collect();

        match timed("count", || self.store.read(&statement, &bookmarks)) {
            Ok(rows) => Ok(rows
                .first()
                .and_then(|row| row.get("c"))
                .and_then(Value::as_u64)
                .unwrap_or(0)),
            Err(StoreError::NoResults) => Ok(0),
            Err(e) => Err(Error::store("count annotations", e)),
        }
    }

    /// Verifies the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if it is not.
    pub fn check(&self) -> Result<()> {
        self.store
            .verify_connectivity()
            .map_err(|e| Error::store("check connectivity", e))
    }

    /// Ensures the node identifier constraint exists. Safe on every start-up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the constraint cannot be created.
    pub fn initialise(&self) -> Result<()> {
        self.store
            .ensure_constraints()
            .map_err(|e| Error::store("initialise constraints", e))
    }

    /// Checks every annotation, then applies predicate defaulting and field
    /// normalization.
    fn prepare(&self, annotations: &[Annotation]) -> Result<Annotations> {
        if let Some(missing) = annotations.iter().find(|a| a.concept_ref.is_empty()) {
            return Err(Error::Validation(format!(
                "Concept uuid missing for annotation {missing:?}"
            )));
        }

        annotations
            .iter()
            .map(|annotation| {
                let mut annotation = annotation.clone();
                if annotation.predicate.is_empty() {
                    if !self.allow_default_predicate {
                        return Err(Error::Validation(format!(
                            "predicate missing for concept {}",
                            annotation.concept_ref
                        )));
                    }
                    annotation.predicate.clone_from(&self.default_predicate);
                }
                annotation.normalize()
            })
            .collect()
    }

    fn to_public(&self, row: Row) -> Result<Annotation> {
        let mut annotation: Annotation = serde_json::from_value(Value::Object(row))
            .map_err(|e| Error::store("read annotations", StoreError::Serialization(e)))?;
        annotation.concept_ref = thing_url(&self.public_api_url, &annotation.concept_ref);
        annotation.agent_ref = annotation
            .agent_ref
            .map(|agent| thing_url(&self.public_api_url, &agent));
        Ok(annotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteGraphStore, Statement, WriteOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONTENT: &str = "32b089d2-2aae-403d-be6e-877404f586cf";
    const CONCEPT: &str = "http://api.ft.com/things/a7732a22-3884-4bfe-9761-fef161e41d69";
    const LIFECYCLE: &str = "annotations-v2";

    /// Store double that counts calls and fails every one of them.
    #[derive(Default)]
    struct FailingStore {
        calls: AtomicUsize,
    }

    impl GraphStore for FailingStore {
        fn write_batch(&self, _: &[Statement]) -> std::result::Result<WriteOutcome, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }

        fn read(&self, _: &Statement, _: &[Bookmark]) -> std::result::Result<Vec<Row>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Poisoned)
        }

        fn verify_connectivity(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn ensure_constraints(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    fn service(allow_default_predicate: bool) -> AnnotationsService {
        let store = Arc::new(SqliteGraphStore::in_memory().unwrap());
        let settings = ServiceSettings::new("http://api.ft.com/")
            .with_allow_default_predicate(allow_default_predicate);
        AnnotationsService::new(store, settings).unwrap()
    }

    #[test]
    fn test_rejects_relative_api_url() {
        let store = Arc::new(SqliteGraphStore::in_memory().unwrap());
        let result = AnnotationsService::new(store, ServiceSettings::new("not a url"));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_empty_content_id_rejected() {
        let err = service(false)
            .write("", LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "mentions")])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validation_happens_before_io() {
        let store = Arc::new(FailingStore::default());
        let service =
            AnnotationsService::new(store.clone(), ServiceSettings::new("http://api.ft.com"))
                .unwrap();

        let annotations = [Annotation::new(CONCEPT, "mentions"), Annotation::new("", "about")];
        let err = service.write(CONTENT, LIFECYCLE, "v2", &annotations).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = service
            .write(CONTENT, LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "hasAFakePredicate")])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPredicate(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_store_errors_are_wrapped() {
        let store = Arc::new(FailingStore::default());
        let service =
            AnnotationsService::new(store, ServiceSettings::new("http://api.ft.com")).unwrap();

        let err = service
            .write(CONTENT, LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "mentions")])
            .unwrap_err();
        assert!(matches!(err, Error::Store { operation: "write annotations", .. }));
        assert!(!err.is_client_error());

        assert!(service.read(CONTENT, None, LIFECYCLE).is_err());
        assert!(service.count(LIFECYCLE, None, "v2").is_err());
        assert!(service.check().is_err());
        assert!(service.initialise().is_err());
    }

    #[test]
    fn test_empty_predicate_defaults_when_allowed() {
        let service = service(true);
        service
            .write(CONTENT, LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "")])
            .unwrap();
        let read = service.read(CONTENT, None, LIFECYCLE).unwrap().unwrap();
        assert_eq!(read[0].predicate, "MENTIONS");
    }

    #[test]
    fn test_replace_returns_the_written_set() {
        let service = service(true);
        let annotation = Annotation::new(CONCEPT, "").with_annotated_at("2016-01-01T19:43:47.314Z");
        let receipt = service.replace(CONTENT, LIFECYCLE, "v2", &[annotation]).unwrap();
        assert_eq!(receipt.annotations[0].predicate, "mentions");
        assert_eq!(receipt.annotations[0].annotated_at_epoch, Some(1_451_677_427));
    }

    #[test]
    fn test_empty_predicate_rejected_when_not_allowed() {
        let service = service(false);
        let err = service
            .write(CONTENT, LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "")])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(service.read(CONTENT, None, LIFECYCLE).unwrap(), None);
    }

    #[test]
    fn test_read_rewrites_references() {
        let service = service(false);
        let annotation = Annotation::new(CONCEPT, "about")
            .with_agent("http://api.ft.com/things/0edd3c31-1fd0-4ef6-9230-8d545be3880a");
        let bookmark = service.write(CONTENT, LIFECYCLE, "v2", &[annotation]).unwrap();

        let read = service
            .read(CONTENT, Some(&bookmark), LIFECYCLE)
            .unwrap()
            .unwrap();
        assert_eq!(read[0].concept_ref, CONCEPT);
        assert_eq!(
            read[0].agent_ref.as_deref(),
            Some("http://api.ft.com/things/0edd3c31-1fd0-4ef6-9230-8d545be3880a")
        );
        assert_eq!(read[0].types, vec!["Thing".to_string()]);
    }

    #[test]
    fn test_delete_reports_found() {
        let service = service(false);
        service
            .write(CONTENT, LIFECYCLE, "v2", &[Annotation::new(CONCEPT, "mentions")])
            .unwrap();

        let first = service.delete(CONTENT, LIFECYCLE).unwrap();
        assert!(first.found);
        assert_eq!(first.relationships_deleted, 1);

        let second = service.delete(CONTENT, LIFECYCLE).unwrap();
        assert!(!second.found);
    }

    #[test]
    fn test_count_of_empty_store_is_zero() {
        assert_eq!(service(false).count(LIFECYCLE, None, "v2").unwrap(), 0);
    }
}
