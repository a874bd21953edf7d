//! `AnnotationsService` Integration Tests
//!
//! Exercises the service against a real `SqliteGraphStore`:
//! - Replace-all-for-scope writes and idempotence
//! - Scope isolation between lifecycles and content
//! - Field fidelity on read-back
//! - All-or-nothing validation
//! - Delete and count semantics

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use annotations_rw::models::decode_annotations;
use annotations_rw::storage::{GraphOp, GraphStore, Statement};
use annotations_rw::{
    Annotation, AnnotationsService, Error, RelationType, ServiceSettings, SqliteGraphStore,
};
use serde_json::{Map, json};
use std::sync::Arc;

const C1: &str = "32b089d2-2aae-403d-be6e-877404f586cf";
const C2: &str = "a435b4ec-b207-4dce-ac0a-f8e7bbef309b";
const K1_ID: &str = "a7732a22-3884-4bfe-9761-fef161e41d69";
const K2_ID: &str = "c834adfa-10c9-4748-8a21-c08537172706";
const A1_ID: &str = "0edd3c31-1fd0-4ef6-9230-8d545be3880a";
const L1: &str = "annotations-v2";
const L2: &str = "annotations-pac";
const PV: &str = "v2";

// ============================================================================
// Test Helpers
// ============================================================================

fn thing(id: &str) -> String {
    format!("http://api.ft.com/things/{id}")
}

fn setup() -> (Arc<SqliteGraphStore>, AnnotationsService) {
    setup_with(false)
}

fn setup_with(allow_default_predicate: bool) -> (Arc<SqliteGraphStore>, AnnotationsService) {
    let store = Arc::new(SqliteGraphStore::in_memory().expect("in-memory store"));
    let settings = ServiceSettings::new("http://api.ft.com")
        .with_allow_default_predicate(allow_default_predicate);
    let service = AnnotationsService::new(store.clone(), settings).expect("service");
    service.initialise().expect("constraints");
    (store, service)
}

fn full_annotation(concept_id: &str) -> Annotation {
    Annotation::new(thing(concept_id), "mentions")
        .with_relevance(0.9)
        .with_confidence(0.8)
        .with_agent(thing(A1_ID))
        .with_annotated_at("2016-01-01T19:43:47.314Z")
}

// ============================================================================
// Concrete Scenario
// ============================================================================

#[test]
fn test_write_read_delete_scenario() {
    let (_store, service) = setup();

    let bookmark = service
        .write(C1, L1, PV, &[full_annotation(K1_ID)])
        .expect("write");

    let read = service
        .read(C1, Some(&bookmark), L1)
        .expect("read")
        .expect("annotations found");
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].predicate, "MENTIONS");
    assert_eq!(read[0].relevance_score, Some(0.9));
    assert_eq!(read[0].confidence_score, Some(0.8));

    let deleted = service.delete(C1, L1).expect("delete");
    assert!(deleted.found);

    assert_eq!(service.read(C1, Some(&deleted.bookmark), L1).expect("read"), None);
}

// ============================================================================
// Replacement Semantics
// ============================================================================

#[test]
fn test_repeated_write_does_not_duplicate() {
    let (store, service) = setup();
    let set = [full_annotation(K1_ID), Annotation::new(thing(K2_ID), "about")];

    service.write(C1, L1, PV, &set).unwrap();
    let once = service.read(C1, None, L1).unwrap().unwrap();

    service.write(C1, L1, PV, &set).unwrap();
    let twice = service.read(C1, None, L1).unwrap().unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
    assert_eq!(store.relationship_count(C1).unwrap(), 2);
}

#[test]
fn test_update_replaces_previous_set_and_keeps_nodes() {
    let (store, service) = setup();

    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();
    service
        .write(C1, L1, PV, &[Annotation::new(thing(K2_ID), "about")])
        .unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].concept_ref, thing(K2_ID));
    assert_eq!(read[0].predicate, "ABOUT");

    assert!(store.node_exists(C1).unwrap());
    assert!(store.node_exists(K1_ID).unwrap());
    assert!(store.node_exists(K2_ID).unwrap());
}

#[test]
fn test_writes_are_isolated_by_lifecycle_and_content() {
    let (_store, service) = setup();

    service.write(C1, L2, "pac", &[full_annotation(K2_ID)]).unwrap();
    service.write(C2, L1, PV, &[full_annotation(K2_ID)]).unwrap();
    let other_lifecycle = service.read(C1, None, L2).unwrap().unwrap();
    let other_content = service.read(C2, None, L1).unwrap().unwrap();

    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();
    service
        .write(C1, L1, PV, &[Annotation::new(thing(K1_ID), "about")])
        .unwrap();
    service.delete(C1, L1).unwrap();

    assert_eq!(service.read(C1, None, L2).unwrap().unwrap(), other_lifecycle);
    assert_eq!(service.read(C2, None, L1).unwrap().unwrap(), other_content);
}

#[test]
fn test_empty_set_clears_scope() {
    let (_store, service) = setup();
    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();
    service.write(C1, L1, PV, &[]).unwrap();
    assert_eq!(service.read(C1, None, L1).unwrap(), None);
}

// ============================================================================
// Field Fidelity
// ============================================================================

#[test]
fn test_every_field_round_trips() {
    let (_store, service) = setup();
    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    let annotation = &read[0];
    assert_eq!(annotation.concept_ref, thing(K1_ID));
    assert_eq!(annotation.predicate, "MENTIONS");
    assert_eq!(annotation.relevance_score, Some(0.9));
    assert_eq!(annotation.confidence_score, Some(0.8));
    assert_eq!(annotation.agent_ref.as_deref(), Some(thing(A1_ID).as_str()));
    assert_eq!(
        annotation.annotated_at.as_deref(),
        Some("2016-01-01T19:43:47.314Z")
    );
    assert_eq!(annotation.annotated_at_epoch, Some(1_451_677_427));
}

#[test]
fn test_explicit_zero_scores_are_kept() {
    let (_store, service) = setup();
    let annotation = Annotation::new(thing(K1_ID), "about")
        .with_relevance(0.0)
        .with_confidence(0.0);
    service.write(C1, L1, PV, &[annotation]).unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read[0].relevance_score, Some(0.0));
    assert_eq!(read[0].confidence_score, Some(0.0));
}

#[test]
fn test_empty_agent_and_date_are_treated_as_absent() {
    let (_store, service) = setup();
    let decoded = decode_annotations(json!([{
        "id": thing(K1_ID),
        "predicate": "mentions",
        "annotatedBy": "",
        "annotatedDate": ""
    }]))
    .unwrap();
    service.write(C1, L1, PV, &decoded).unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read[0].agent_ref, None);
    assert_eq!(read[0].annotated_at, None);
    assert_eq!(read[0].annotated_at_epoch, None);

    let json = serde_json::to_value(&read[0]).unwrap();
    assert!(json.get("annotatedBy").is_none());
    assert!(json.get("annotatedDate").is_none());
}

#[test]
fn test_absent_scores_stay_absent() {
    let (_store, service) = setup();
    service
        .write(C1, L1, PV, &[Annotation::new(thing(K1_ID), "about")])
        .unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read[0].relevance_score, None);
    assert_eq!(read[0].confidence_score, None);
    assert_eq!(read[0].agent_ref, None);

    let json = serde_json::to_value(&read[0]).unwrap();
    assert!(json.get("relevanceScore").is_none());
}

#[test]
fn test_predicate_uri_is_reduced_to_name() {
    let (_store, service) = setup();
    let annotation = Annotation::new(thing(K1_ID), "http://www.ft.com/ontology/hasAuthor");
    service.write(C1, L1, PV, &[annotation]).unwrap();

    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read[0].predicate, "HAS_AUTHOR");
}

// ============================================================================
// Rejection
// ============================================================================

#[test]
fn test_one_invalid_member_rejects_whole_set() {
    let (store, service) = setup();
    let set = [full_annotation(K1_ID), Annotation::new("", "mentions")];

    let err = service.write(C1, L1, PV, &set).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.is_client_error());
    assert_eq!(store.relationship_count(C1).unwrap(), 0);
}

#[test]
fn test_invalid_set_leaves_existing_scope_untouched() {
    let (_store, service) = setup();
    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();
    let before = service.read(C1, None, L1).unwrap();

    let set = [
        Annotation::new(thing(K2_ID), "about"),
        Annotation::new(thing(K1_ID), "mentions").with_relevance(1.5),
    ];
    assert!(service.write(C1, L1, PV, &set).is_err());
    assert_eq!(service.read(C1, None, L1).unwrap(), before);
}

#[test]
fn test_unknown_predicate_is_rejected() {
    let (store, service) = setup();
    let err = service
        .write(C1, L1, PV, &[Annotation::new(thing(K1_ID), "hasAFakePredicate")])
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedPredicate(ref p) if p == "hasAFakePredicate"));
    assert_eq!(store.relationship_count(C1).unwrap(), 0);
}

#[test]
fn test_concept_without_uuid_is_malformed() {
    let (_store, service) = setup();
    let err = service
        .write(C1, L1, PV, &[Annotation::new("http://api.ft.com/things/", "about")])
        .unwrap_err();
    assert!(matches!(err, Error::MalformedReference(_)));
}

#[test]
fn test_missing_predicate_defaults_when_enabled() {
    let (_store, service) = setup_with(true);
    service
        .write(C1, L1, PV, &[Annotation::new(thing(K1_ID), "")])
        .unwrap();
    let read = service.read(C1, None, L1).unwrap().unwrap();
    assert_eq!(read[0].predicate, "MENTIONS");
}

#[test]
fn test_missing_predicate_rejected_when_disabled() {
    let (store, service) = setup_with(false);
    let err = service
        .write(C1, L1, PV, &[Annotation::new(thing(K1_ID), "")])
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.relationship_count(C1).unwrap(), 0);
}

// ============================================================================
// Delete and Count
// ============================================================================

#[test]
fn test_delete_removes_exactly_the_scope() {
    let (store, service) = setup();
    service
        .write(
            C1,
            L1,
            PV,
            &[full_annotation(K1_ID), Annotation::new(thing(K2_ID), "about")],
        )
        .unwrap();
    service.write(C1, L2, "pac", &[full_annotation(K1_ID)]).unwrap();

    let deleted = service.delete(C1, L1).unwrap();
    assert!(deleted.found);
    assert_eq!(deleted.relationships_deleted, 2);
    assert_eq!(store.relationship_count(C1).unwrap(), 1);
    assert!(store.node_exists(C1).unwrap());
    assert!(store.node_exists(K2_ID).unwrap());

    assert_eq!(service.read(C1, None, L1).unwrap(), None);
    assert!(service.read(C1, None, L2).unwrap().is_some());
}

#[test]
fn test_delete_of_empty_scope_is_not_an_error() {
    let (_store, service) = setup();
    let outcome = service.delete(C2, L1).unwrap();
    assert!(!outcome.found);
    assert_eq!(outcome.relationships_deleted, 0);
}

#[test]
fn test_count_includes_untagged_relationships() {
    let (store, service) = setup();
    service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();
    service.write(C2, L2, "pac", &[full_annotation(K1_ID)]).unwrap();

    let mut properties = Map::new();
    properties.insert("platformVersion".to_string(), json!(PV));
    let legacy = Statement::new(
        "MERGE",
        Map::new(),
        GraphOp::MergeRelationship {
            from_id: C2.to_string(),
            to_id: K2_ID.to_string(),
            relation: RelationType::new("MENTIONS").unwrap(),
            lifecycle: None,
            properties,
        },
    );
    let outcome = store.write_batch(&[legacy]).unwrap();

    assert_eq!(service.count(L1, Some(&outcome.bookmark), PV).unwrap(), 2);
    assert_eq!(service.count(L2, None, "pac").unwrap(), 1);
}

// ============================================================================
// Bookmarks and Persistence
// ============================================================================

#[test]
fn test_read_with_foreign_bookmark_fails() {
    let (_store, service) = setup();
    let (_other_store, other) = setup();
    let bookmark = other.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap();

    let err = service.read(C1, Some(&bookmark), L1).unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
    assert!(!err.is_client_error());
}

#[test]
fn test_annotations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("annotations.db");

    let bookmark = {
        let store = Arc::new(SqliteGraphStore::open(&path).unwrap());
        let service =
            AnnotationsService::new(store, ServiceSettings::new("http://api.ft.com")).unwrap();
        service.write(C1, L1, PV, &[full_annotation(K1_ID)]).unwrap()
    };

    let store = Arc::new(SqliteGraphStore::open(&path).unwrap());
    let service =
        AnnotationsService::new(store, ServiceSettings::new("http://api.ft.com")).unwrap();
    let read = service.read(C1, Some(&bookmark), L1).unwrap().unwrap();
    assert_eq!(read[0].concept_ref, thing(K1_ID));
}
