//! Broker payloads.
//!
//! A [`Message`] is an opaque body plus string properties. The harness only
//! ever creates text bodies; byte bodies exist so consumers can observe a
//! message of an unexpected type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{MessageId, TypesError};

/// Payload of the message the driver sends to the test queue.
pub const QUEUE_TEXT_MESSAGE: &str = "Hello Queue!";

/// Payload of request messages sent to the relay's inbound queue.
pub const QUEUE_MDB_TEXT_MESSAGE: &str = "Hello MDB - request message!";

/// Payload of every reply the relay sends to the outbound queue.
pub const QUEUE_MDB_REPLY_MESSAGE: &str = "Hello MDB - reply message!";

/// Property the relay sets on a reply; holds the inbound message id.
pub const IN_MESSAGE_ID_PROPERTY: &str = "inMessageId";

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

/// A message as stored and delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    body: Body,
    properties: BTreeMap<String, String>,
    /// Unix timestamp (milliseconds) when the message was created
    timestamp: i64,
}

impl Message {
    /// Create a text message with a fresh id.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::with_body(Body::Text(payload.into()))
    }

    /// Create a byte message with a fresh id.
    pub fn bytes(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_body(Body::Bytes(payload.into()))
    }

    fn with_body(body: Body) -> Self {
        Self {
            id: MessageId::new(),
            body,
            properties: BTreeMap::new(),
            timestamp: now_millis(),
        }
    }

    /// Set a string property (builder style).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The message id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The message body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The text payload, or `None` for non-text bodies.
    pub fn text_payload(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            Body::Bytes(_) => None,
        }
    }

    /// Look up a string property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The inbound message this message replies to, if stamped by the relay.
    pub fn correlation_id(&self) -> Option<MessageId> {
        self.property(IN_MESSAGE_ID_PROPERTY)
            .and_then(MessageId::parse)
    }

    /// Creation timestamp in unix milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Encode)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Decode)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            Body::Text(_) => "TextMessage",
            Body::Bytes(_) => "BytesMessage",
        };
        write!(f, "{}[messageID={}, timestamp={}", kind, self.id, self.timestamp)?;
        for (key, value) in &self.properties {
            write!(f, ", {}={}", key, value)?;
        }
        write!(f, "]")
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_exposes_payload() {
        let msg = Message::text("hello");
        assert_eq!(msg.text_payload(), Some("hello"));
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn bytes_message_has_no_text() {
        let msg = Message::bytes(vec![1, 2, 3]);
        assert_eq!(msg.text_payload(), None);
        assert_eq!(msg.body(), &Body::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn correlation_id_reads_in_message_id_property() {
        let request = Message::text(QUEUE_MDB_TEXT_MESSAGE);
        let reply = Message::text(QUEUE_MDB_REPLY_MESSAGE)
            .with_property(IN_MESSAGE_ID_PROPERTY, request.id().to_string());

        assert_eq!(reply.correlation_id(), Some(request.id()));
        assert_eq!(request.correlation_id(), None);
    }

    #[test]
    fn encoded_message_decodes_with_properties() {
        let msg = Message::text("payload").with_property("k", "v");
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.property("k"), Some("v"));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            Message::from_bytes(&[0xc1, 0x00]),
            Err(TypesError::Decode(_))
        ));
    }

    #[test]
    fn display_lists_kind_id_and_properties() {
        let msg = Message::text("x").with_property(IN_MESSAGE_ID_PROPERTY, "ID:abc");
        let shown = msg.to_string();
        assert!(shown.starts_with("TextMessage[messageID=ID:"));
        assert!(shown.contains("inMessageId=ID:abc"));
    }
}
