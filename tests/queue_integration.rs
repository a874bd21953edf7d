//! Queue Ingestion Integration Tests
//!
//! Feeds queue messages through `QueueHandler` into an in-memory store and
//! checks what gets written, skipped and forwarded.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use annotations_rw::config::{LifecycleConfig, ServiceSettings};
use annotations_rw::forwarder::{ChannelProducer, Forwarder, OutboundMessage};
use annotations_rw::queue::{MessageOutcome, QueueHandler, QueueMessage, QueueStats};
use annotations_rw::{AnnotationsService, SqliteGraphStore};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const CONTENT: &str = "32b089d2-2aae-403d-be6e-877404f586cf";
const CONCEPT: &str = "http://api.ft.com/things/a7732a22-3884-4bfe-9761-fef161e41d69";
const PAC: &str = "http://cmdb.ft.com/systems/pac";

const LIFECYCLES: &str = r#"{
    "originMap": {"http://cmdb.ft.com/systems/pac": "annotations-pac"},
    "lifecycleMap": {"annotations-pac": "pac"},
    "messageType": "Annotations"
}"#;

// ============================================================================
// Test Helpers
// ============================================================================

fn service() -> AnnotationsService {
    service_with(ServiceSettings::new("http://api.ft.com"))
}

fn service_with(settings: ServiceSettings) -> AnnotationsService {
    let store = Arc::new(SqliteGraphStore::in_memory().unwrap());
    AnnotationsService::new(store, settings).unwrap()
}

fn handler(service: AnnotationsService) -> (QueueHandler, UnboundedReceiver<OutboundMessage>) {
    let lifecycles = Arc::new(LifecycleConfig::from_json(LIFECYCLES).unwrap());
    let (producer, receiver) = ChannelProducer::new();
    let handler = QueueHandler::new(service, lifecycles)
        .with_forwarder(Arc::new(Forwarder::new(producer, "Annotations")));
    (handler, receiver)
}

fn message(headers: &[(&str, &str)], body: &Value) -> QueueMessage {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    QueueMessage::new(headers, body.to_string())
}

fn annotations_body(predicate: &str) -> Value {
    json!({
        "uuid": CONTENT,
        "annotations": [{"id": CONCEPT, "predicate": predicate, "relevanceScore": 1.0}]
    })
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_message_is_written_and_forwarded() {
    let service = service();
    let (handler, mut forwarded) = handler(service.clone());

    let outcome = handler.handle(&message(
        &[("X-Request-Id", "tid_queue"), ("Origin-System-Id", PAC)],
        &annotations_body("about"),
    ));

    let MessageOutcome::Written {
        content_id,
        bookmark,
        forwarded: was_forwarded,
    } = outcome
    else {
        panic!("expected the message to be written");
    };
    assert_eq!(content_id, CONTENT);
    assert!(was_forwarded);

    let read = service
        .read(CONTENT, Some(&bookmark), "annotations-pac")
        .unwrap()
        .unwrap();
    assert_eq!(read[0].predicate, "ABOUT");

    let sent = forwarded.try_recv().unwrap();
    assert_eq!(sent.headers["X-Request-Id"], "tid_queue");
    assert_eq!(sent.headers["Origin-System-Id"], PAC);
    let body: Value = serde_json::from_str(&sent.body).unwrap();
    assert_eq!(
        body["contentUri"],
        format!("http://pac.annotations-rw.svc.local/annotations/{CONTENT}")
    );
}

#[test]
fn test_forwarded_body_carries_the_written_set() {
    let service = service_with(
        ServiceSettings::new("http://api.ft.com").with_allow_default_predicate(true),
    );
    let (handler, mut forwarded) = handler(service);
    let body = json!({
        "uuid": CONTENT,
        "annotations": [{
            "id": CONCEPT,
            "predicate": "",
            "annotatedBy": "",
            "annotatedDate": "2016-01-01T19:43:47.314Z"
        }]
    });

    let outcome = handler.handle(&message(
        &[("X-Request-Id", "tid_defaulted"), ("Origin-System-Id", PAC)],
        &body,
    ));
    assert_eq!(outcome.label(), "written");

    let sent = forwarded.try_recv().unwrap();
    let body: Value = serde_json::from_str(&sent.body).unwrap();
    let annotation = &body["payload"]["annotations"][0];
    assert_eq!(annotation["predicate"], "mentions");
    assert_eq!(annotation["annotatedDateEpoch"], 1_451_677_427);
    assert!(annotation.get("annotatedBy").is_none());
}

#[test]
fn test_provenance_body_is_accepted() {
    let service = service();
    let (handler, _forwarded) = handler(service.clone());
    let body = json!({
        "UUID": CONTENT,
        "Annotations": [{"thing": {"id": CONCEPT, "predicate": "mentions"}, "provenances": []}]
    });

    let outcome = handler.handle(&message(
        &[("x-request-id", "tid_queue"), ("origin-system-id", PAC)],
        &body,
    ));
    assert_eq!(outcome.label(), "written");
    assert!(service.read(CONTENT, None, "annotations-pac").unwrap().is_some());
}

#[test]
fn test_uninterpretable_messages_are_skipped() {
    let (handler, mut forwarded) = handler(service());
    let body = annotations_body("about");

    let missing_tid = handler.handle(&message(&[("Origin-System-Id", PAC)], &body));
    let missing_origin = handler.handle(&message(&[("X-Request-Id", "tid_1")], &body));
    let unknown_origin = handler.handle(&message(
        &[("X-Request-Id", "tid_1"), ("Origin-System-Id", "http://cmdb.ft.com/systems/unknown")],
        &body,
    ));
    let bad_body = handler.handle(&QueueMessage::new(
        BTreeMap::from([
            ("X-Request-Id".to_string(), "tid_1".to_string()),
            ("Origin-System-Id".to_string(), PAC.to_string()),
        ]),
        "{not json",
    ));

    for outcome in [missing_tid, missing_origin, unknown_origin, bad_body] {
        assert!(matches!(outcome, MessageOutcome::Skipped { .. }), "{outcome:?}");
    }
    assert!(forwarded.try_recv().is_err());
}

#[test]
fn test_rejected_write_is_failed_and_not_forwarded() {
    let (handler, mut forwarded) = handler(service());
    let outcome = handler.handle(&message(
        &[("X-Request-Id", "tid_1"), ("Origin-System-Id", PAC)],
        &annotations_body("hasAFakePredicate"),
    ));
    assert!(matches!(outcome, MessageOutcome::Failed { ref content_id, .. } if content_id == CONTENT));
    assert!(forwarded.try_recv().is_err());
}

#[tokio::test]
async fn test_run_drains_channel_in_order() {
    let service = service();
    let (handler, _forwarded) = handler(service.clone());
    let (sender, receiver) = mpsc::channel(8);

    let headers = [("X-Request-Id", "tid_1"), ("Origin-System-Id", PAC)];
    sender.send(message(&headers, &annotations_body("about"))).await.unwrap();
    sender.send(message(&headers, &annotations_body("hasAFakePredicate"))).await.unwrap();
    sender.send(message(&[], &annotations_body("about"))).await.unwrap();
    sender.send(message(&headers, &annotations_body("mentions"))).await.unwrap();
    drop(sender);

    let stats = handler.run(receiver).await;
    assert_eq!(
        stats,
        QueueStats {
            written: 2,
            skipped: 1,
            failed: 1,
        }
    );

    let read = service.read(CONTENT, None, "annotations-pac").unwrap().unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].predicate, "MENTIONS");
}

#[test]
fn test_json_line_records_feed_the_handler() {
    let (handler, _forwarded) = handler(service());
    let line = json!({
        "headers": {"X-Request-Id": "tid_line", "Origin-System-Id": PAC},
        "body": annotations_body("about")
    })
    .to_string();

    let outcome = handler.handle(&QueueMessage::from_json_line(&line).unwrap());
    assert_eq!(outcome.label(), "written");
}
