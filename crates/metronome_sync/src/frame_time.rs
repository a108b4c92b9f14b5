//! # Frame-Time Predictor
//!
//! Predicts the timestamp of the next display sync from a short history of
//! recent sync-to-sync deltas, and produces the delta-seconds value the
//! scene uses to step animations.
//!
//! Pure arithmetic over a small ring of samples; no locking of its own.
//! The synchronization cores wrap it in a mutex and guarantee the
//! `suspend`/`resume` and `sleep`/`wake_up` pairs bracket any pause or
//! idle gap, so the gap is never counted as real frame time.

use metronome_core::time::TimeSource;
use std::sync::Arc;

/// Number of sync deltas retained for smoothing.
const SYNC_DELTA_HISTORY: usize = 3;

/// Runaway clamp: a smoothed interval never exceeds this many minimum
/// frame intervals.
const MAXIMUM_INTERVAL_MULTIPLE: u64 = 4;

/// One frame's timing, handed to the update role once per cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTick {
    /// Seconds between the syncs consumed by the previous and current
    /// update, for animation stepping.
    pub delta_seconds: f32,
    /// Timestamp of the most recent display sync, in milliseconds.
    pub last_sync_time_ms: u64,
    /// Predicted timestamp of the next display sync, in milliseconds.
    pub next_sync_time_ms: u64,
}

/// Next-sync predictor fed by the vsync role and read by the update role.
pub struct FrameTime {
    clock: Arc<dyn TimeSource>,
    /// Configured minimum interval between rendered frames (micros).
    minimum_interval: u64,
    /// Timestamp of the latest recorded sync (micros).
    last_sync_time: u64,
    /// Frame number of the latest recorded sync.
    last_sync_frame_number: u32,
    /// `last_sync_time` as of the previous prediction (micros).
    last_sync_time_at_update: u64,
    /// False while suspended or asleep; ticks are ignored.
    running: bool,
    /// True until the first sync after construction, resume or wake-up.
    fresh: bool,
    /// True until the first prediction after construction, resume or
    /// wake-up; that prediction reports exactly one minimum interval.
    first_prediction: bool,
    deltas: [u64; SYNC_DELTA_HISTORY],
    delta_count: usize,
    delta_index: usize,
}

impl FrameTime {
    /// Creates a predictor reading timestamps from `clock`.
    pub fn new(clock: Arc<dyn TimeSource>, minimum_interval_micros: u64) -> Self {
        let now = clock.now_micros();
        Self {
            clock,
            minimum_interval: minimum_interval_micros,
            last_sync_time: now,
            last_sync_frame_number: 0,
            last_sync_time_at_update: now,
            running: true,
            fresh: true,
            first_prediction: true,
            deltas: [0; SYNC_DELTA_HISTORY],
            delta_count: 0,
            delta_index: 0,
        }
    }

    /// Sets the minimum interval between rendered frames, derived from
    /// the number of vsync ticks per render.
    pub fn set_minimum_frame_time_interval(&mut self, micros: u64) {
        self.minimum_interval = micros;
    }

    /// Records a fresh sync tick at the current clock time.
    ///
    /// Ignored while suspended or asleep.
    pub fn set_sync_time(&mut self, frame_number: u32) {
        if !self.running {
            return;
        }

        let now = self.clock.now_micros();
        if self.fresh {
            self.fresh = false;
        } else {
            let delta = now.saturating_sub(self.last_sync_time);
            if delta > 0 {
                self.deltas[self.delta_index] = delta;
                self.delta_index = (self.delta_index + 1) % SYNC_DELTA_HISTORY;
                self.delta_count = (self.delta_count + 1).min(SYNC_DELTA_HISTORY);
            }
        }
        self.last_sync_time = now;
        self.last_sync_frame_number = frame_number;
    }

    /// Computes this frame's delta and the predicted next sync time.
    ///
    /// Called once per update cycle. The first prediction after
    /// construction, [`resume`](Self::resume) or
    /// [`wake_up`](Self::wake_up) reports exactly one minimum interval so
    /// animations never see the gap as elapsed time.
    pub fn predict_next_sync(&mut self) -> FrameTick {
        let now = self.clock.now_micros();
        let interval = self.smoothed_interval();

        let delta_micros = if self.first_prediction {
            self.first_prediction = false;
            self.minimum_interval
        } else {
            let raw = self.last_sync_time.saturating_sub(self.last_sync_time_at_update);
            raw.min(self.minimum_interval * MAXIMUM_INTERVAL_MULTIPLE)
        };
        self.last_sync_time_at_update = self.last_sync_time;

        let mut next_sync_time = self.last_sync_time + interval;
        while next_sync_time <= now {
            next_sync_time += interval;
        }

        FrameTick {
            delta_seconds: delta_micros as f32 / 1_000_000.0,
            last_sync_time_ms: self.last_sync_time / 1_000,
            next_sync_time_ms: next_sync_time / 1_000,
        }
    }

    /// Frame number carried by the latest recorded sync.
    #[must_use]
    pub fn last_sync_frame_number(&self) -> u32 {
        self.last_sync_frame_number
    }

    /// Stops timing accumulation across a pause.
    pub fn suspend(&mut self) {
        self.running = false;
    }

    /// Restarts timing accumulation after a pause. The pause gap is
    /// discarded rather than counted as frame time.
    pub fn resume(&mut self) {
        self.restart();
    }

    /// Stops timing accumulation across an idle sleep.
    pub fn sleep(&mut self) {
        self.running = false;
    }

    /// Restarts timing accumulation after an idle sleep.
    pub fn wake_up(&mut self) {
        self.restart();
    }

    fn restart(&mut self) {
        self.running = true;
        self.fresh = true;
        self.first_prediction = true;
        self.delta_count = 0;
        self.delta_index = 0;
        self.last_sync_time = self.clock.now_micros();
        self.last_sync_time_at_update = self.last_sync_time;
    }

    /// Average of the retained deltas, clamped between one and
    /// [`MAXIMUM_INTERVAL_MULTIPLE`] minimum intervals.
    fn smoothed_interval(&self) -> u64 {
        if self.delta_count == 0 {
            return self.minimum_interval;
        }
        let sum: u64 = self.deltas[..self.delta_count].iter().sum();
        let average = sum / self.delta_count as u64;
        average.clamp(
            self.minimum_interval,
            self.minimum_interval * MAXIMUM_INTERVAL_MULTIPLE,
        )
    }
}

impl std::fmt::Debug for FrameTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTime")
            .field("minimum_interval", &self.minimum_interval)
            .field("last_sync_time", &self.last_sync_time)
            .field("last_sync_frame_number", &self.last_sync_frame_number)
            .field("running", &self.running)
            .finish()
    }
}
