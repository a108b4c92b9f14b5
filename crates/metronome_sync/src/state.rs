//! # Synchronization State Machine
//!
//! The single authoritative state of a synchronization core. There is one
//! copy, owned by the core and mutated only while holding the core's
//! primary lock (the update monitor).
//!
//! Legal transitions:
//!
//! ```text
//! STOPPED → INITIALISING → RUNNING ⇄ PAUSED
//!                          RUNNING ⇄ SLEEPING
//!    RUNNING/PAUSED/SLEEPING → REPLACING_SURFACE → (previous state)
//!    RUNNING/PAUSED          → STOPPED
//! ```
//!
//! Requests that do not match a legal edge are ignored: the protocol is
//! state-based, not edge-triggered.

/// Lifecycle state of a synchronization core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Nothing running. The initial and final state.
    Stopped,
    /// Threads are being set up; the startup barrier has not released yet.
    Initialising,
    /// Frames are being produced in lock-step with vsync.
    Running,
    /// The event thread paused the core; the update role performs one
    /// bookkeeping pass and then parks.
    Paused,
    /// The scene reported nothing to animate for several consecutive
    /// frames; the update role is parked and the vsync role is paused.
    Sleeping,
    /// A surface replacement rendezvous is in flight (three-thread core
    /// only; the combined core uses a surface slot instead).
    ReplacingSurface,
}

impl SyncState {
    /// Whether `pause()` is legal from this state.
    #[must_use]
    pub fn can_pause(self) -> bool {
        matches!(self, Self::Running | Self::Sleeping)
    }

    /// Whether a surface replacement may begin from this state.
    #[must_use]
    pub fn can_replace_surface(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Sleeping)
    }
}
