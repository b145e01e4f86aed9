//! Monotonic millisecond time source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Millisecond tick counter used to time rounds and pace the liveness blink.
pub trait MonotonicClock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never decreases.
    fn ticks_ms(&self) -> u64;

    /// Milliseconds elapsed since `start`, saturating at zero.
    fn ticks_since(&self, start: u64) -> u64 {
        self.ticks_ms().saturating_sub(start)
    }
}

/// Clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl MonotonicClock for SystemClock {
    fn ticks_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock advanced by hand, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

impl MonotonicClock for ManualClock {
    fn ticks_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}
