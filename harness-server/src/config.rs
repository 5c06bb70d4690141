//! Configuration loading for the crash harness.
//!
//! Configuration is loaded from an optional TOML file; every section and
//! field has a default, and command-line flags override file values.

use harness_relay::WorkloadConfig;
use harness_types::{QueueName, TypesError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the crash harness.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Broker backend configuration.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Queue names.
    #[serde(default)]
    pub queues: QueuesConfig,
    /// Request dispatcher configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Relay consumer configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Simulated relay workload.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Which broker implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// Durable queues in a SQLite file.
    Sqlite,
    /// In-process queues; lost when the process exits.
    Memory,
}

/// Broker backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Backend (default: sqlite).
    #[serde(default = "default_backend")]
    pub backend: BrokerBackend,
    /// Path to SQLite database file (default: harness.db).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Seconds a received message stays leased before redelivery (default: 30).
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

/// Queue names.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuesConfig {
    /// Queue for plain send/consume requests (default: test-queue).
    #[serde(default = "default_test_queue")]
    pub test_queue: String,
    /// Queue the relay consumes from (default: in-queue).
    #[serde(default = "default_in_queue")]
    pub in_queue: String,
    /// Queue the relay replies to (default: out-queue).
    #[serde(default = "default_out_queue")]
    pub out_queue: String,
}

/// Request dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Receive timeout for consume requests in milliseconds (default: 1000).
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Batch size when `messageCount` is absent or empty (default: 180).
    #[serde(default = "default_message_count")]
    pub default_message_count: u32,
}

/// Relay consumer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Run the relay in this process (default: true).
    #[serde(default = "default_relay_enabled")]
    pub enabled: bool,
    /// Number of listener workers (default: 15).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Kill the process on every multiple of this ordinal; 0 disables (default: 100).
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: u64,
    /// Listener receive timeout in milliseconds (default: 1000).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Validated queue names.
#[derive(Debug, Clone)]
pub struct Queues {
    /// Target of `send-message` / `consume-message`.
    pub test: QueueName,
    /// Relay inbound queue.
    pub inbound: QueueName,
    /// Relay outbound queue.
    pub outbound: QueueName,
}

// Default value functions
fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_backend() -> BrokerBackend {
    BrokerBackend::Sqlite
}

fn default_database_path() -> PathBuf {
    PathBuf::from("harness.db")
}

fn default_lease_secs() -> u64 {
    30
}

fn default_test_queue() -> String {
    "test-queue".to_string()
}

fn default_in_queue() -> String {
    "in-queue".to_string()
}

fn default_out_queue() -> String {
    "out-queue".to_string()
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

fn default_message_count() -> u32 {
    180
}

fn default_relay_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    15
}

fn default_crash_threshold() -> u64 {
    100
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database: default_database_path(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            test_queue: default_test_queue(),
            in_queue: default_in_queue(),
            out_queue: default_out_queue(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            default_message_count: default_message_count(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_relay_enabled(),
            concurrency: default_concurrency(),
            crash_threshold: default_crash_threshold(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl BrokerConfig {
    /// Lease duration for the SQLite backend.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Reject settings the backend cannot run with.
    ///
    /// A zero lease would make every claimed message immediately claimable
    /// again, so two workers could process the same request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_secs == 0 {
            return Err(ConfigError::InvalidLease(self.lease_secs));
        }
        Ok(())
    }
}

impl QueuesConfig {
    /// Validate the configured names.
    pub fn resolve(&self) -> Result<Queues, ConfigError> {
        Ok(Queues {
            test: QueueName::new(self.test_queue.as_str())?,
            inbound: QueueName::new(self.in_queue.as_str())?,
            outbound: QueueName::new(self.out_queue.as_str())?,
        })
    }
}

impl DispatcherConfig {
    /// Receive timeout for consume requests.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl RelayConfig {
    /// Listener receive timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A configured queue name is not valid.
    #[error("invalid queue configuration: {0}")]
    InvalidQueue(#[from] TypesError),
    /// The broker lease is too short to hold a claim.
    #[error("broker.lease_secs must be at least 1, got {0}")]
    InvalidLease(u64),
}
