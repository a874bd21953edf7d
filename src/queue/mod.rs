//! Asynchronous ingestion of annotation messages.
//!
//! A message carries `X-Request-Id` and `Origin-System-Id` headers and a body
//! of `{"uuid": "...", "annotations": [...]}`. The origin system selects the
//! lifecycle, the lifecycle selects the platform version, and the decoded set
//! replaces that scope. Messages that cannot be interpreted are skipped;
//! failed writes are logged and not retried.

use crate::config::LifecycleConfig;
use crate::forwarder::{ForwardRequest, QueueForwarder};
use crate::models::decode_annotations;
use crate::observability::{RequestContext, TRANSACTION_ID_HEADER, enter_request_context};
use crate::services::{AnnotationsService, WriteReceipt};
use crate::storage::Bookmark;
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Header naming the system the annotations came from.
pub const ORIGIN_SYSTEM_HEADER: &str = "Origin-System-Id";

/// A message consumed from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// Raw JSON body.
    pub body: String,
}

#[derive(Deserialize)]
struct IngestRecord {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: Value,
}

#[derive(Deserialize)]
struct AnnotationsBody {
    #[serde(alias = "UUID", default)]
    uuid: String,
    #[serde(alias = "Annotations", default)]
    annotations: Value,
}

impl QueueMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(headers: BTreeMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Parses one JSON-lines record: `{"headers": {...}, "body": ...}`.
    ///
    /// The body may be a JSON string or an inline object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the line is not such a record.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let record: IngestRecord = serde_json::from_str(line)
            .map_err(|e| Error::InvalidInput(format!("queue record: {e}")))?;
        let body = match record.body {
            Value::String(body) => body,
            other => other.to_string(),
        };
        Ok(Self::new(record.headers, body))
    }

    /// Looks up a header, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The message could not be interpreted and was dropped.
    Skipped {
        /// Why it was dropped.
        reason: String,
    },
    /// The write failed.
    Failed {
        /// Content the message was for.
        content_id: String,
        /// The error.
        error: String,
    },
    /// The annotations were written.
    Written {
        /// Content the message was for.
        content_id: String,
        /// Bookmark of the write.
        bookmark: Bookmark,
        /// Whether the set was forwarded.
        forwarded: bool,
    },
}

impl MessageOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Written { .. } => "written",
        }
    }
}

/// Totals reported when a queue drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages written.
    pub written: u64,
    /// Messages skipped.
    pub skipped: u64,
    /// Messages whose write failed.
    pub failed: u64,
}

impl QueueStats {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Skipped { .. } => self.skipped += 1,
            MessageOutcome::Failed { .. } => self.failed += 1,
            MessageOutcome::Written { .. } => self.written += 1,
        }
    }
}

/// Writes queued annotation messages and forwards them.
#[derive(Clone)]
pub struct QueueHandler {
    service: AnnotationsService,
    lifecycles: Arc<LifecycleConfig>,
    forwarder: Option<Arc<dyn QueueForwarder>>,
}

impl QueueHandler {
    /// Creates a handler without forwarding.
    #[must_use]
    pub fn new(service: AnnotationsService, lifecycles: Arc<LifecycleConfig>) -> Self {
        Self {
            service,
            lifecycles,
            forwarder: None,
        }
    }

    /// Forwards every written set.
    #[must_use]
    pub fn with_forwarder(mut self, forwarder: Arc<dyn QueueForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Processes one message. Blocks on the store.
    pub fn handle(&self, message: &QueueMessage) -> MessageOutcome {
        let outcome = self.process(message);
        metrics::counter!("queue_messages_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn process(&self, message: &QueueMessage) -> MessageOutcome {
        let Some(transaction_id) = message.header(TRANSACTION_ID_HEADER) else {
            tracing::error!("Missing transaction id from message");
            return skipped("missing transaction id");
        };
        let _context = enter_request_context(RequestContext::from_id(transaction_id));

        let Some(origin_system) = message.header(ORIGIN_SYSTEM_HEADER) else {
            tracing::error!(transaction_id = %transaction_id, "Missing Origin-System-Id header from message");
            return skipped("missing origin system");
        };

        let Some(lifecycle) = self.lifecycles.lifecycle_for_origin(origin_system) else {
            tracing::error!(
                transaction_id = %transaction_id,
                origin_system = %origin_system,
                "Annotation lifecycle not found for origin system"
            );
            return skipped(&format!("no lifecycle for origin system {origin_system}"));
        };
        let Some(platform_version) = self.lifecycles.platform_version(lifecycle) else {
            tracing::error!(
                transaction_id = %transaction_id,
                lifecycle = %lifecycle,
                "Platform version not found for lifecycle"
            );
            return skipped(&format!("no platform version for lifecycle {lifecycle}"));
        };

        let (content_id, annotations) = match serde_json::from_str::<AnnotationsBody>(&message.body)
            .map_err(|e| Error::InvalidInput(e.to_string()))
            .and_then(|body| Ok((body.uuid, decode_annotations(body.annotations)?)))
        {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::error!(transaction_id = %transaction_id, error = %e, "Cannot process received message");
                return skipped("undecodable body");
            },
        };

        let WriteReceipt {
            bookmark,
            annotations,
        } = match self
            .service
            .replace(&content_id, lifecycle, platform_version, &annotations)
        {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(
                    transaction_id = %transaction_id,
                    content_id = %content_id,
                    error = %e,
                    "Cannot write annotations"
                );
                return MessageOutcome::Failed {
                    content_id,
                    error: e.to_string(),
                };
            },
        };
        tracing::info!(
            transaction_id = %transaction_id,
            content_id = %content_id,
            "{} successfully written",
            self.lifecycles.message_type
        );

        let forwarded = self.forwarder.as_ref().is_some_and(|forwarder| {
            tracing::debug!(transaction_id = %transaction_id, content_id = %content_id, "Forwarding message");
            let request = ForwardRequest {
                transaction_id: transaction_id.to_string(),
                origin_system: origin_system.to_string(),
                bookmark: bookmark.clone(),
                platform_version: platform_version.to_string(),
                content_id: content_id.clone(),
                annotations,
                publication: Vec::new(),
            };
            forwarder.send_message(&request).is_ok()
        });

        MessageOutcome::Written {
            content_id,
            bookmark,
            forwarded,
        }
    }

    /// Drains a channel until every sender is dropped, one message at a time.
    pub async fn run(&self, mut receiver: mpsc::Receiver<QueueMessage>) -> QueueStats {
        let mut stats = QueueStats::default();
        while let Some(message) = receiver.recv().await {
            let handler = self.clone();
            let outcome = tokio::task::spawn_blocking(move || handler.handle(&message))
                .await
                .unwrap_or_else(|e| MessageOutcome::Failed {
                    content_id: String::new(),
                    error: format!("message handler panicked: {e}"),
                });
            stats.record(&outcome);
        }
        tracing::info!(
            written = stats.written,
            skipped = stats.skipped,
            failed = stats.failed,
            "Queue drained"
        );
        stats
    }
}

fn skipped(reason: &str) -> MessageOutcome {
    MessageOutcome::Skipped {
        reason: reason.to_string(),
    }
}
