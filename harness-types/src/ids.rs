//! Identity types for messages and destinations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Prefix used when a message id is rendered as a string.
const MESSAGE_ID_PREFIX: &str = "ID:";

/// Longest queue name accepted by [`QueueName::new`].
const MAX_QUEUE_NAME_LEN: usize = 255;

/// A unique identifier for a message.
///
/// UUID v4, displayed as `ID:<uuid>` so it reads like a broker-assigned id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Create a new random MessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a MessageId from its display form (`ID:<uuid>`) or a bare UUID.
    pub fn parse(s: &str) -> Option<Self> {
        let raw = s.strip_prefix(MESSAGE_ID_PREFIX).unwrap_or(s);
        uuid::Uuid::parse_str(raw).ok().map(Self)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", MESSAGE_ID_PREFIX, self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Logical name of a broker-managed queue.
///
/// Non-empty, no whitespace, at most 255 bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create a validated queue name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypesError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_QUEUE_NAME_LEN {
            Some("longer than 255 bytes")
        } else if name.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TypesError::InvalidQueueName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// The raw queue name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity string reported back to HTTP callers, e.g. `Queue[in-queue]`.
    pub fn identity(&self) -> String {
        format!("Queue[{}]", self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueName({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_uuid_v4() {
        let id = MessageId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn message_id_display_has_prefix() {
        let id = MessageId::new();
        let display = id.to_string();
        assert!(display.starts_with("ID:"));
        assert_eq!(display.len(), 3 + 36);
    }

    #[test]
    fn message_id_parses_display_and_bare_forms() {
        let id = MessageId::new();
        assert_eq!(MessageId::parse(&id.to_string()), Some(id));
        assert_eq!(MessageId::parse(&id.as_uuid().to_string()), Some(id));
        assert_eq!(MessageId::parse("ID:not-a-uuid"), None);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn queue_name_accepts_plain_names() {
        let queue = QueueName::new("in-queue").unwrap();
        assert_eq!(queue.as_str(), "in-queue");
        assert_eq!(queue.to_string(), "in-queue");
        assert_eq!(queue.identity(), "Queue[in-queue]");
    }

    #[test]
    fn queue_name_rejects_bad_names() {
        assert!(QueueName::new("").is_err());
        assert!(QueueName::new("out queue").is_err());
        assert!(QueueName::new("x".repeat(256)).is_err());
        assert!(QueueName::new("x".repeat(255)).is_ok());
    }

    #[test]
    fn queue_name_deserializes_with_validation() {
        let queue: QueueName = serde_json::from_str("\"test-queue\"").unwrap();
        assert_eq!(queue.as_str(), "test-queue");

        let bad: Result<QueueName, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
