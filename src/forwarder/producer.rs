//! Message producers.

use super::{MessageProducer, OutboundMessage};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;

/// Producer that pushes messages onto an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelProducer {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelProducer {
    /// Creates a producer and the receiver that drains it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MessageProducer for ChannelProducer {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::OperationFailed {
                operation: "forward_message".to_string(),
                cause: "message channel closed".to_string(),
            })
    }
}

/// Producer that POSTs messages to a message-bus HTTP proxy.
///
/// Headers are sent as HTTP headers and the body as the request body. Uses a
/// blocking client, so it must be called from a blocking context.
pub struct HttpProducer {
    /// HTTP client with connection pooling.
    client: reqwest::blocking::Client,
    /// Proxy endpoint.
    url: String,
}

impl HttpProducer {
    /// Creates a producer posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, Duration::from_secs(10))
    }

    /// Creates a producer with a custom request timeout.
    #[must_use]
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("annotations-rw/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self {
            client,
            url: url.into(),
        }
    }

    /// Returns the proxy endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MessageProducer for HttpProducer {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut request = self.client.post(&self.url);
        for (name, value) in &message.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(message.body)
            .send()
            .map_err(|e| Error::OperationFailed {
                operation: "forward_message".to_string(),
                cause: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::OperationFailed {
                operation: "forward_message".to_string(),
                cause: format!("HTTP {} response", status.as_u16()),
            })
        }
    }
}
