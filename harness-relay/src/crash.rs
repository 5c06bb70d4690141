//! Crash injection.
//!
//! Every `threshold`-th relay invocation terminates the process abruptly,
//! after its reply has been sent but before its inbound delivery is
//! acknowledged. The broker is left holding that delivery in flight, which is
//! exactly the situation a recovery test wants to observe.

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, PoisonError};

/// Exit code used for a forced crash.
pub const CRASH_EXIT_CODE: i32 = 1;

/// Terminate the process immediately.
///
/// On unix this is `_exit(2)`: no atexit handlers, no destructors, no stdio
/// flushing and no tokio runtime shutdown.
pub fn hard_exit(code: i32) -> ! {
    #[cfg(unix)]
    {
        // SAFETY: _exit takes no pointers and never returns.
        unsafe { libc::_exit(code) }
    }
    #[cfg(not(unix))]
    {
        std::process::exit(code)
    }
}

/// What happens when the crash trigger fires.
pub trait Halt: Send + Sync + 'static {
    /// Called with the ordinal that reached the threshold.
    fn halt(&self, ordinal: u64);
}

/// Halts by hard-exiting the process with [`CRASH_EXIT_CODE`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHalt;

impl Halt for ProcessHalt {
    fn halt(&self, ordinal: u64) {
        tracing::error!(ordinal, exit_code = CRASH_EXIT_CODE, "Crash threshold reached, killing process");
        hard_exit(CRASH_EXIT_CODE)
    }
}

/// Records ordinals instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingHalt {
    ordinals: Mutex<Vec<u64>>,
}

impl RecordingHalt {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinals at which a crash would have happened, in call order.
    pub fn ordinals(&self) -> Vec<u64> {
        self.ordinals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Halt for RecordingHalt {
    fn halt(&self, ordinal: u64) {
        self.ordinals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ordinal);
    }
}

/// Fires a [`Halt`] on every multiple of a threshold.
#[derive(Clone)]
pub struct CrashTrigger {
    threshold: Option<NonZeroU64>,
    halt: Arc<dyn Halt>,
}

impl std::fmt::Debug for CrashTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashTrigger")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl CrashTrigger {
    /// Create a trigger. A threshold of `0` disables it.
    pub fn new(threshold: u64, halt: Arc<dyn Halt>) -> Self {
        Self {
            threshold: NonZeroU64::new(threshold),
            halt,
        }
    }

    /// The configured threshold, `None` when disabled.
    pub fn threshold(&self) -> Option<u64> {
        self.threshold.map(NonZeroU64::get)
    }

    /// True if `ordinal` is a multiple of the threshold.
    pub fn should_crash(&self, ordinal: u64) -> bool {
        match self.threshold {
            Some(threshold) => ordinal > 0 && ordinal % threshold.get() == 0,
            None => false,
        }
    }

    /// Halt if `ordinal` is a multiple of the threshold.
    pub fn check(&self, ordinal: u64) {
        if self.should_crash(ordinal) {
            self.halt.halt(ordinal);
        }
    }
}
