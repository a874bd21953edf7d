//! Forwarding of written annotation sets to a message bus.
//!
//! After a successful write the HTTP and queue layers hand the written set to
//! a [`QueueForwarder`]. [`Forwarder`] frames it as an [`OutboundMessage`] and
//! passes it to a [`MessageProducer`]:
//!
//! | Producer | Use Case |
//! |----------|----------|
//! | [`ChannelProducer`] | In-process consumers and tests |
//! | [`HttpProducer`] | POST to a message-bus HTTP proxy |

mod producer;

pub use producer::{ChannelProducer, HttpProducer};

use crate::models::Annotations;
use crate::storage::Bookmark;
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// `Message-Type` header of every forwarded message.
pub const MESSAGE_TYPE_HEADER_VALUE: &str = "concept-annotation";

/// Domain used in content URIs unless overridden.
pub const DEFAULT_CONTENT_URI_DOMAIN: &str = "svc.local";

/// A written annotation set with its scope metadata.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Transaction id of the originating request or message.
    pub transaction_id: String,
    /// Origin system of the annotations.
    pub origin_system: String,
    /// Bookmark of the write.
    pub bookmark: Bookmark,
    /// Platform version of the scope.
    pub platform_version: String,
    /// Content identifier.
    pub content_id: String,
    /// The annotations as written.
    pub annotations: Annotations,
    /// Publications the content belongs to.
    pub publication: Vec<String>,
}

/// Sends written annotation sets onwards.
pub trait QueueForwarder: Send + Sync {
    /// Sends one written annotation set.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be built or delivered.
    fn send_message(&self, request: &ForwardRequest) -> Result<()>;
}

/// A framed message: headers plus a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: String,
}

/// Delivers framed messages.
pub trait MessageProducer: Send + Sync {
    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the message.
    fn send(&self, message: OutboundMessage) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputBody<'a> {
    payload: Map<String, Value>,
    content_uri: String,
    last_modified: &'a str,
}

/// Builds forwarded messages and hands them to a producer.
pub struct Forwarder<P: MessageProducer> {
    producer: P,
    message_type: String,
    domain: String,
}

impl<P: MessageProducer> Forwarder<P> {
    /// Creates a forwarder; `message_type` names the payload key.
    #[must_use]
    pub fn new(producer: P, message_type: impl Into<String>) -> Self {
        Self {
            producer,
            message_type: message_type.into(),
            domain: DEFAULT_CONTENT_URI_DOMAIN.to_string(),
        }
    }

    /// Sets the domain used in content URIs.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Returns the producer.
    #[must_use]
    pub const fn producer(&self) -> &P {
        &self.producer
    }

    /// Frames a request as an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the annotations cannot be serialized.
    pub fn build_message(&self, request: &ForwardRequest) -> Result<OutboundMessage> {
        let headers = create_headers(
            &request.transaction_id,
            &request.origin_system,
            &request.bookmark,
        );
        let last_modified = headers
            .get("Message-Timestamp")
            .cloned()
            .unwrap_or_default();

        let message_key = self.message_type.to_lowercase();
        let annotations = serde_json::to_value(&request.annotations).map_err(|e| {
            Error::OperationFailed {
                operation: "serialize_forward_message".to_string(),
                cause: e.to_string(),
            }
        })?;

        let mut payload = Map::new();
        payload.insert(message_key.clone(), annotations);
        payload.insert("lastModified".to_string(), Value::String(last_modified.clone()));
        payload.insert("uuid".to_string(), Value::String(request.content_id.clone()));
        payload.insert(
            "publication".to_string(),
            Value::from(request.publication.clone()),
        );

        let body = OutputBody {
            payload,
            content_uri: format!(
                "http://{}.{message_key}-rw.{}/annotations/{}",
                request.platform_version, self.domain, request.content_id
            ),
            last_modified: &last_modified,
        };

        let body = serde_json::to_string(&body).map_err(|e| Error::OperationFailed {
            operation: "serialize_forward_message".to_string(),
            cause: e.to_string(),
        })?;

        Ok(OutboundMessage { headers, body })
    }
}

impl<P: MessageProducer> QueueForwarder for Forwarder<P> {
    fn send_message(&self, request: &ForwardRequest) -> Result<()> {
        let message = self.build_message(request)?;
        self.producer.send(message).inspect_err(|e| {
            metrics::counter!("annotations_forward_failed_total").increment(1);
            tracing::error!(
                content_id = %request.content_id,
                transaction_id = %request.transaction_id,
                error = %e,
                "Failed to forward annotations"
            );
        })
    }
}

/// Headers carried by every forwarded message.
#[must_use]
pub fn create_headers(
    transaction_id: &str,
    origin_system: &str,
    bookmark: &Bookmark,
) -> BTreeMap<String, String> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    BTreeMap::from([
        ("X-Request-Id".to_string(), transaction_id.to_string()),
        ("Message-Timestamp".to_string(), timestamp),
        ("Message-Id".to_string(), Uuid::new_v4().to_string()),
        (
            "Message-Type".to_string(),
            MESSAGE_TYPE_HEADER_VALUE.to_string(),
        ),
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Origin-System-Id".to_string(), origin_system.to_string()),
        ("Graph-Bookmark".to_string(), bookmark.to_string()),
    ])
}
