//! # VSync Source Adapter
//!
//! Wraps hardware vsync or a software timer fallback into a uniform
//! "wait for the next tick" call. The strategy is chosen once at startup;
//! the sync core never cares which one produced a tick, only whether it
//! was valid.
//!
//! Platform hardware sources (DRM vblank and friends) live outside this
//! crate and are injected as `Box<dyn VsyncSource>`. The software timer
//! here is the universal fallback: it sleeps for the remainder of the
//! frame period on the wall clock, so an idle display costs no CPU.

use metronome_core::time::TimeSource;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One display sync tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncTick {
    /// Source-specific sequence number, increasing with each tick.
    pub sequence: u32,
    /// Timestamp seconds component.
    pub seconds: u32,
    /// Timestamp microseconds component.
    pub microseconds: u32,
}

/// A blocking source of display sync ticks.
pub trait VsyncSource: Send {
    /// Prepares the source. Returning false means the source is unusable
    /// and the caller should fall back to a software timer.
    fn initialize(&mut self) -> bool;

    /// Whether ticks come from real display hardware.
    fn use_hardware(&self) -> bool;

    /// Blocks until the next tick. `None` reports a spurious wake; the
    /// vsync loop still runs its bookkeeping but feeds no timestamp.
    fn wait_for_tick(&mut self) -> Option<VsyncTick>;

    /// Releases any platform resources. Called once when the vsync loop
    /// exits.
    fn terminate(&mut self);
}

/// Software fallback: paces ticks by sleeping the remainder of the frame
/// period.
pub struct SoftwareTimer {
    clock: Arc<dyn TimeSource>,
    frame_interval_micros: u64,
    sequence: u32,
    last_tick_micros: Option<u64>,
}

impl SoftwareTimer {
    /// Creates a timer ticking every `frame_interval_micros`.
    pub fn new(clock: Arc<dyn TimeSource>, frame_interval_micros: u64) -> Self {
        Self {
            clock,
            frame_interval_micros,
            sequence: 0,
            last_tick_micros: None,
        }
    }
}

impl VsyncSource for SoftwareTimer {
    fn initialize(&mut self) -> bool {
        true
    }

    fn use_hardware(&self) -> bool {
        false
    }

    fn wait_for_tick(&mut self) -> Option<VsyncTick> {
        if let Some(last) = self.last_tick_micros {
            let elapsed = self.clock.now_micros().saturating_sub(last);
            if elapsed < self.frame_interval_micros {
                thread::sleep(Duration::from_micros(self.frame_interval_micros - elapsed));
            }
        }

        let stamp = self.clock.now_micros();
        self.last_tick_micros = Some(stamp);
        self.sequence = self.sequence.wrapping_add(1);

        Some(VsyncTick {
            sequence: self.sequence,
            seconds: (stamp / 1_000_000) as u32,
            microseconds: (stamp % 1_000_000) as u32,
        })
    }

    fn terminate(&mut self) {}
}

impl std::fmt::Debug for SoftwareTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTimer")
            .field("frame_interval_micros", &self.frame_interval_micros)
            .field("sequence", &self.sequence)
            .finish()
    }
}
