//! Harness process coordination.
//!
//! [`Harness`] owns the broker handle, the dispatcher and the relay's shared
//! state, and starts the relay's listener pool.

use crate::config::{BrokerBackend, BrokerConfig, Config, ConfigError, Queues};
use crate::dispatcher::Dispatcher;
use crate::error::HarnessError;
use harness_broker::{Broker, BrokerResult, MemoryBroker, SqliteBroker};
use harness_relay::{
    spawn_listener_pool, CrashTrigger, Halt, ListenerConfig, ListenerPool, ProcessedCounter,
    RelayConsumer, RelayMetrics,
};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for the HTTP driver.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct HarnessMetrics {
    /// Total `/mq-test` requests handled.
    pub requests_total: AtomicU64,
    /// Total messages sent by the driver (batches count each message).
    pub messages_sent_total: AtomicU64,
    /// Total messages consumed by the driver.
    pub messages_received_total: AtomicU64,
    /// Total failed driver operations.
    pub errors_total: AtomicU64,
}

/// Open the configured broker backend.
pub async fn open_broker(config: &BrokerConfig) -> BrokerResult<Arc<dyn Broker>> {
    match config.backend {
        BrokerBackend::Sqlite => {
            let broker = SqliteBroker::open(&config.database)
                .await?
                .with_lease(config.lease());
            tracing::info!(database = %config.database.display(), lease_secs = config.lease_secs, "Opened SQLite broker");
            Ok(Arc::new(broker))
        }
        BrokerBackend::Memory => {
            tracing::info!("Using in-memory broker");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

/// The running harness: driver plus relay state.
pub struct Harness {
    config: Config,
    broker: Arc<dyn Broker>,
    queues: Queues,
    dispatcher: Dispatcher,
    counter: Arc<ProcessedCounter>,
    relay_metrics: Arc<RelayMetrics>,
    metrics: Arc<HarnessMetrics>,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .field("queues", &self.queues)
            .field("processed", &self.counter.get())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Create a harness over an already opened broker.
    pub fn new(config: Config, broker: Arc<dyn Broker>) -> Result<Self, ConfigError> {
        let queues = config.queues.resolve()?;
        let metrics = Arc::new(HarnessMetrics::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&broker),
            queues.clone(),
            &config.dispatcher,
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            broker,
            queues,
            dispatcher,
            counter: Arc::new(ProcessedCounter::new()),
            relay_metrics: Arc::new(RelayMetrics::default()),
            metrics,
        })
    }

    /// Open the configured broker and create a harness over it.
    pub async fn open(config: Config) -> Result<Self, HarnessError> {
        config.broker.validate()?;
        let broker = open_broker(&config.broker).await?;
        Ok(Self::new(config, broker)?)
    }

    /// Get the harness configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the broker handle.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Get the validated queue names.
    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Get the request dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of relay invocations in this process.
    pub fn processed(&self) -> u64 {
        self.counter.get()
    }

    /// Get the relay counters.
    pub fn relay_metrics(&self) -> &RelayMetrics {
        &self.relay_metrics
    }

    /// Get the driver counters.
    pub fn metrics(&self) -> &HarnessMetrics {
        &self.metrics
    }

    /// Whether the relay runs in this process.
    pub fn relay_enabled(&self) -> bool {
        self.config.relay.enabled
    }

    /// Start the relay's listener pool, or return `None` if the relay is
    /// disabled. `halt` is what happens at the crash threshold.
    pub fn start_relay(&self, halt: Arc<dyn Halt>) -> Option<ListenerPool> {
        let relay = &self.config.relay;
        if !relay.enabled {
            tracing::info!("Relay disabled");
            return None;
        }

        let consumer = RelayConsumer::new(
            Arc::clone(&self.broker),
            self.queues.outbound.clone(),
            Arc::clone(&self.counter),
            CrashTrigger::new(relay.crash_threshold, halt),
        )
        .with_workload(self.config.workload.clone())
        .with_metrics(Arc::clone(&self.relay_metrics));

        tracing::info!(
            inbound = %self.queues.inbound,
            outbound = %self.queues.outbound,
            crash_threshold = relay.crash_threshold,
            "Starting relay"
        );

        Some(spawn_listener_pool(
            Arc::clone(&self.broker),
            Arc::new(consumer),
            ListenerConfig {
                queue: self.queues.inbound.clone(),
                concurrency: relay.concurrency,
                poll_timeout: relay.poll_timeout(),
            },
        ))
    }
}
