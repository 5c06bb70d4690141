//! HTTP-triggered broker operations.
//!
//! Each request performs exactly one broker operation and answers with a
//! short human-readable line. Missing or unknown request kinds get the
//! usage listing instead of an error.

use crate::config::{DispatcherConfig, Queues};
use crate::error::DispatchError;
use crate::server::HarnessMetrics;
use harness_broker::{Broker, BrokerResult};
use harness_types::{
    Message, QueueName, RequestKind, QUEUE_MDB_TEXT_MESSAGE, QUEUE_TEXT_MESSAGE,
};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Placeholder the responses use for "nothing received".
const NULL: &str = "null";

/// Query parameters of `/mq-test`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchParams {
    /// Request kind value, e.g. `send-message`.
    pub request: Option<String>,
    /// Batch size for `send-request-message-for-mdb-and-kill-server`.
    #[serde(rename = "messageCount")]
    pub message_count: Option<String>,
}

/// Maps request kinds to broker operations.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    queues: Queues,
    receive_timeout: Duration,
    default_message_count: u32,
    metrics: Arc<HarnessMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queues", &self.queues)
            .field("receive_timeout", &self.receive_timeout)
            .field("default_message_count", &self.default_message_count)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        broker: Arc<dyn Broker>,
        queues: Queues,
        config: &DispatcherConfig,
        metrics: Arc<HarnessMetrics>,
    ) -> Self {
        Self {
            broker,
            queues,
            receive_timeout: config.receive_timeout(),
            default_message_count: config.default_message_count,
            metrics,
        }
    }

    /// Handle one `/mq-test` request and return the response body.
    pub async fn dispatch(&self, params: &DispatchParams) -> Result<String, DispatchError> {
        let raw = match params.request.as_deref() {
            None | Some("") => return Ok(self.usage(None)),
            Some(raw) => raw,
        };
        let kind = match raw.parse::<RequestKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(error = %e, "Unknown request, returning usage");
                return Ok(self.usage(Some(raw)));
            }
        };

        tracing::debug!(request = %kind, "Dispatching request");
        let result = self.run(kind, params).await;
        if let Err(e) = &result {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!(request = %kind, error = %e, "Request failed");
        }
        result
    }

    async fn run(&self, kind: RequestKind, params: &DispatchParams) -> Result<String, DispatchError> {
        match kind {
            RequestKind::SendMessage => {
                self.send_one(&self.queues.test, QUEUE_TEXT_MESSAGE).await?;
                Ok(format!("Sent a text message to {}", self.queues.test.identity()))
            }
            RequestKind::SendRelayRequest => {
                self.send_one(&self.queues.inbound, QUEUE_MDB_TEXT_MESSAGE)
                    .await?;
                Ok(format!(
                    "Sent a request message for the relay to {}",
                    self.queues.inbound.identity()
                ))
            }
            RequestKind::SendRelayBatchAndKill => {
                let count =
                    parse_message_count(params.message_count.as_deref(), self.default_message_count)?;
                Ok(self.send_batch(count).await)
            }
            RequestKind::ConsumeMessage => {
                let message = self.consume(&self.queues.test).await?;
                Ok(message
                    .as_ref()
                    .and_then(Message::text_payload)
                    .unwrap_or(NULL)
                    .to_string())
            }
            RequestKind::ConsumeRelayReply => {
                let message = self.consume(&self.queues.outbound).await?;
                Ok(match message {
                    Some(message) => format!(
                        "{} message details: {}",
                        message.text_payload().unwrap_or(NULL),
                        message
                    ),
                    None => format!("{NULL} message details: {NULL}"),
                })
            }
            RequestKind::DrainRelayReplies => {
                let mut count: u64 = 0;
                while self.consume(&self.queues.outbound).await?.is_some() {
                    count += 1;
                }
                tracing::info!(count, queue = %self.queues.outbound, "Drained reply queue");
                Ok(count.to_string())
            }
        }
    }

    async fn send_one(&self, queue: &QueueName, payload: &str) -> BrokerResult<()> {
        let message = Message::text(payload);
        let id = message.id();
        self.broker.send(queue, message).await?;
        self.metrics.messages_sent_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(queue = %queue, message_id = %id, "Sent message");
        Ok(())
    }

    /// Send `count` requests in one transaction.
    ///
    /// A failure is reported in the body rather than as an error; nothing
    /// from the failed batch becomes visible.
    async fn send_batch(&self, count: u32) -> String {
        let queue = &self.queues.inbound;
        match self.try_send_batch(queue, count).await {
            Ok(()) => {
                self.metrics
                    .messages_sent_total
                    .fetch_add(u64::from(count), Ordering::Relaxed);
                tracing::info!(count, queue = %queue, "Committed request batch");
                format!("{} messages were sent into queue: {}", count, queue.identity())
            }
            Err(e) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(count, queue = %queue, error = %e, "Request batch failed");
                format!(
                    "Failed to send {} messages into queue {}: {}",
                    count,
                    queue.identity(),
                    e
                )
            }
        }
    }

    async fn try_send_batch(&self, queue: &QueueName, count: u32) -> BrokerResult<()> {
        let mut session = self.broker.begin().await?;
        for _ in 0..count {
            session.send(queue, Message::text(QUEUE_MDB_TEXT_MESSAGE)).await?;
        }
        session.commit().await
    }

    async fn consume(&self, queue: &QueueName) -> BrokerResult<Option<Message>> {
        let message = self.broker.consume(queue, self.receive_timeout).await?;
        if let Some(message) = &message {
            self.metrics
                .messages_received_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(queue = %queue, message_id = %message.id(), "Consumed message");
        }
        Ok(message)
    }

    /// The usage listing, naming the rejected request value.
    pub fn usage(&self, request: Option<&str>) -> String {
        let mut out = format!(
            "Invalid request parameter: {}<br>Usage:<ul>",
            request.map(escape_html).unwrap_or_else(|| NULL.to_string())
        );
        for kind in RequestKind::ALL {
            out.push_str(&format!(
                "<li>use <b>?request={}</b> parameter to {}</li>",
                kind.value(),
                self.describe(kind)
            ));
        }
        out.push_str("</ul>");
        out
    }

    fn describe(&self, kind: RequestKind) -> String {
        match kind {
            RequestKind::SendMessage => "send a message to the test queue".to_string(),
            RequestKind::SendRelayRequest => {
                "send a request message to the relay's inbound queue".to_string()
            }
            RequestKind::SendRelayBatchAndKill => format!(
                "send {} request messages to the relay's inbound queue in one transaction; \
                 the relay kills the process when its crash threshold is reached. \
                 Use <b>&amp;messageCount=20</b> to change the number of messages",
                self.default_message_count
            ),
            RequestKind::ConsumeMessage => "consume a message from the test queue".to_string(),
            RequestKind::ConsumeRelayReply => {
                "consume a reply message from the relay's outbound queue".to_string()
            }
            RequestKind::DrainRelayReplies => {
                "consume all reply messages from the relay's outbound queue".to_string()
            }
        }
    }
}

/// Parse `messageCount`. Absent or empty means `default`.
pub fn parse_message_count(raw: Option<&str>, default: u32) -> Result<u32, DispatchError> {
    match raw {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<u32>()
            .map_err(|source| DispatchError::InvalidMessageCount {
                value: value.to_string(),
                source,
            }),
    }
}

/// Escape text for inclusion in an HTML response body.
pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
