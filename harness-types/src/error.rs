//! Error types for harness types.

use thiserror::Error;

/// Errors raised while building or decoding harness types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Queue name failed validation
    #[error("invalid queue name {name:?}: {reason}")]
    InvalidQueueName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Request kind string not in the supported set
    #[error("unsupported request kind: {0}")]
    UnknownRequest(String),

    /// MessagePack serialization failed
    #[error("message encoding failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("message decoding failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::UnknownRequest("explode".into());
        assert_eq!(err.to_string(), "unsupported request kind: explode");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
