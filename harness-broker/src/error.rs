//! Error types for broker backends.

use harness_types::TypesError;

/// Broker operation errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] TypesError),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Transaction commit failed.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Ack or release for a claim the broker no longer holds, including one
    /// whose lease expired and was re-claimed.
    #[error("unknown delivery receipt {receipt} on queue {queue}")]
    UnknownDelivery {
        /// Queue the delivery came from.
        queue: String,
        /// The receipt that was not found.
        receipt: u64,
    },
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
