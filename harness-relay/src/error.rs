//! Error types for the relay.

use harness_broker::BrokerError;

/// Relay invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Broker error while relaying.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The simulated workload task panicked or was cancelled.
    #[error("workload task failed: {0}")]
    Workload(#[from] tokio::task::JoinError),
}

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
