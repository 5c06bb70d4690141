//! # harness-relay
//!
//! The relay half of the crash harness.
//!
//! A [`ListenerPool`] receives request messages from the inbound queue and
//! hands each one to a [`RelayConsumer`], which sends a correlated reply to
//! the outbound queue. Every Nth invocation process-wide kills the process
//! before the inbound delivery is acknowledged.
//!
//! ```text
//!  in-queue ──► ListenerPool ──► RelayConsumer ──► out-queue
//!                (N workers)        │
//!                                   └── ordinal % threshold == 0 ──► _exit(1)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crash;
pub mod workload;

mod consumer;
mod counter;
mod error;
mod listener;
mod metrics;

pub use consumer::{MessageListener, RelayConsumer};
pub use counter::ProcessedCounter;
pub use crash::{CrashTrigger, Halt, ProcessHalt, RecordingHalt, CRASH_EXIT_CODE};
pub use error::{RelayError, RelayResult};
pub use listener::{spawn_listener_pool, ListenerConfig, ListenerPool};
pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use workload::WorkloadConfig;
