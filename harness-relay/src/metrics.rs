//! Relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters for the relay consumer.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Inbound deliveries handed to the consumer.
    pub received_total: AtomicU64,
    /// Replies sent to the outbound queue.
    pub relayed_total: AtomicU64,
    /// Inbound messages that were not text.
    pub type_mismatch_total: AtomicU64,
    /// Invocations that failed (reply send or workload).
    pub failures_total: AtomicU64,
}

impl RelayMetrics {
    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            received_total: self.received_total.load(Ordering::Relaxed),
            relayed_total: self.relayed_total.load(Ordering::Relaxed),
            type_mismatch_total: self.type_mismatch_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
        }
    }
}

/// Plain values read from [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayMetricsSnapshot {
    /// See [`RelayMetrics::received_total`].
    pub received_total: u64,
    /// See [`RelayMetrics::relayed_total`].
    pub relayed_total: u64,
    /// See [`RelayMetrics::type_mismatch_total`].
    pub type_mismatch_total: u64,
    /// See [`RelayMetrics::failures_total`].
    pub failures_total: u64,
}
