//! # Monotonic Time Sources
//!
//! The frame-time predictor works entirely in microseconds from an
//! arbitrary epoch. Putting the clock behind a trait keeps the predictor's
//! arithmetic deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic clock measured in microseconds from an arbitrary epoch.
pub trait TimeSource: Send + Sync {
    /// Microseconds elapsed since this source's epoch. Never decreases.
    fn now_micros(&self) -> u64;
}

/// Wall-clock time source backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose epoch is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_micros(&self) -> u64 {
        // Instant is monotonic; u64 micros overflows after ~580k years.
        self.epoch.elapsed().as_micros() as u64
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Threads share the clock through an `Arc`; the test advances it between
/// protocol steps.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Creates a clock starting at the given microsecond timestamp.
    #[must_use]
    pub fn starting_at(micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(micros),
        }
    }

    /// Advances the clock by `delta` microseconds.
    pub fn advance(&self, delta: u64) {
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute microsecond timestamp.
    ///
    /// # Panics
    ///
    /// Panics if this would move the clock backwards.
    pub fn set(&self, micros: u64) {
        let previous = self.micros.swap(micros, Ordering::SeqCst);
        assert!(previous <= micros, "ManualClock must stay monotonic");
    }
}

impl TimeSource for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}
