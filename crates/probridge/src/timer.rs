//! Monotonic time sources for reply budgets and cache freshness.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Process-wide monotonic base. Established on first use.
static BASE: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed on a monotonic clock since the first call in this
/// process. Wall-clock adjustments do not affect it, and the u64 horizon
/// (half a billion years) far exceeds any session.
pub fn monotonic_ms() -> u64 {
    BASE.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Elapsed-time stopwatch. Starts on construction.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedTimer(Instant);

impl ElapsedTimer {
    pub fn start() -> Self {
        ElapsedTimer(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}
