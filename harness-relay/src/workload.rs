//! Simulated business latency.
//!
//! The relay pretends to do work by sleeping a random number of times for a
//! random duration. The sleeps block the calling thread, so callers run this
//! on a blocking thread.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Bounds of the simulated workload. Ranges exclude their upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkloadConfig {
    /// Fewest sleep iterations (default: 5).
    #[serde(default = "default_min_iterations")]
    pub min_iterations: u32,
    /// Upper bound on iterations, exclusive (default: 10).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Shortest sleep in milliseconds (default: 10).
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,
    /// Upper bound on a sleep in milliseconds, exclusive (default: 20).
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,
}

fn default_min_iterations() -> u32 {
    5
}

fn default_max_iterations() -> u32 {
    10
}

fn default_min_sleep_ms() -> u64 {
    10
}

fn default_max_sleep_ms() -> u64 {
    20
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            min_iterations: default_min_iterations(),
            max_iterations: default_max_iterations(),
            min_sleep_ms: default_min_sleep_ms(),
            max_sleep_ms: default_max_sleep_ms(),
        }
    }
}

impl WorkloadConfig {
    /// A workload that does nothing.
    pub fn none() -> Self {
        Self {
            min_iterations: 0,
            max_iterations: 0,
            min_sleep_ms: 0,
            max_sleep_ms: 0,
        }
    }
}

/// Draw the sleeps for one invocation.
///
/// An empty range (`min >= max`) yields `min`.
pub fn plan<R: Rng>(config: &WorkloadConfig, rng: &mut R) -> Vec<Duration> {
    let iterations = if config.min_iterations < config.max_iterations {
        rng.gen_range(config.min_iterations..config.max_iterations)
    } else {
        config.min_iterations
    };

    (0..iterations)
        .map(|_| {
            let millis = if config.min_sleep_ms < config.max_sleep_ms {
                rng.gen_range(config.min_sleep_ms..config.max_sleep_ms)
            } else {
                config.min_sleep_ms
            };
            Duration::from_millis(millis)
        })
        .collect()
}

/// Run one simulated workload on the current thread. Returns the time slept.
pub fn simulate_business_logic(config: &WorkloadConfig) -> Duration {
    let sleeps = plan(config, &mut rand::thread_rng());
    let iterations = sleeps.len();
    let mut total = Duration::ZERO;

    for sleep in sleeps {
        std::thread::sleep(sleep);
        total += sleep;
    }

    tracing::trace!(iterations, slept_ms = total.as_millis() as u64, "Simulated workload done");
    total
}
