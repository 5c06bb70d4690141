//! Error types for the crash harness server.

use harness_broker::BrokerError;
use std::num::ParseIntError;

/// Startup and runtime errors of the harness process.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Broker error.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// A request the dispatcher could not carry out.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Broker error while sending or receiving.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// `messageCount` was present but not an unsigned integer.
    #[error("invalid messageCount {value:?}: {source}")]
    InvalidMessageCount {
        /// The raw parameter value.
        value: String,
        /// Parse failure.
        source: ParseIntError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_count_names_the_value() {
        let source = "abc".parse::<u32>().unwrap_err();
        let err = DispatchError::InvalidMessageCount {
            value: "abc".into(),
            source,
        };
        assert!(err.to_string().starts_with("invalid messageCount \"abc\""));
    }

    #[test]
    fn broker_error_converts() {
        let err: DispatchError = BrokerError::SendFailed("down".into()).into();
        assert_eq!(err.to_string(), "broker error: send failed: down");
    }
}
