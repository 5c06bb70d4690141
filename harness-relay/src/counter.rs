//! Process-wide count of relay invocations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter shared by every listener worker.
///
/// Starts at zero with each process; nothing is persisted.
#[derive(Debug, Default)]
pub struct ProcessedCounter {
    value: AtomicU64,
}

impl ProcessedCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value (the invocation's ordinal).
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
