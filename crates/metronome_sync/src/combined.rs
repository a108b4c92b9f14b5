//! # Combined Two-Thread Synchronization Core
//!
//! The simpler design point: update and render share one thread, paced by
//! a separate vsync thread. There is no update-ahead-of-render counter
//! (update and render are trivially serialized) and surface replacement
//! uses a plain surface slot instead of an explicit sub-state: the event
//! thread deposits the new surface, the combined thread drains it on its
//! next pass, swaps, and signals completion.
//!
//! Also carries the post-render handshake: the combined thread can park
//! between presenting a frame and starting the next one until the event
//! thread calls [`CombinedSynchronization::post_render_complete`], with a
//! pending surface replacement releasing the hold early.

use crate::frame_time::{FrameTick, FrameTime};
use crate::monitor::Monitor;
use crate::state::SyncState;
use metronome_core::markers::{MarkerSink, PerformanceMarker};
use metronome_core::surface::RenderSurface;
use metronome_core::time::TimeSource;
use metronome_core::trigger::NotificationTrigger;
use metronome_core::PacingConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Worker threads participating in the startup barrier.
const CREATED_THREAD_COUNT: u32 = 2;

/// One iteration's instructions for the combined update/render loop.
pub struct CombinedPass {
    /// Timing for this frame's scene update.
    pub tick: FrameTick,
    /// When set, the loop must swap to this surface (and call
    /// [`CombinedSynchronization::surface_replaced`]) instead of
    /// rendering this iteration.
    pub new_surface: Option<Box<dyn RenderSurface>>,
}

impl std::fmt::Debug for CombinedPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedPass")
            .field("tick", &self.tick)
            .field("new_surface", &self.new_surface.is_some())
            .finish()
    }
}

/// Fields guarded by the combined-thread monitor (the primary lock).
struct CombinedShared {
    state: SyncState,
    /// Ticks banked by the vsync role, drained by the combined role.
    vsync_ahead_of_update: u32,
    /// One-shot resume fast-path flag.
    resuming: bool,
    /// One-shot forced-frame flag.
    once: bool,
    try_to_sleep_count: u32,
    /// Surface deposited by the event thread, drained exactly once.
    new_surface: Option<Box<dyn RenderSurface>>,
    /// The combined thread is holding between post-render and the next
    /// frame.
    post_rendering: bool,
    sync_frame_number: u32,
    sync_seconds: u32,
    sync_microseconds: u32,
}

/// Fields guarded by the vsync monitor.
struct VsyncShared {
    run: bool,
    stop: bool,
    initialised: bool,
}

/// Fields guarded by the event monitor.
struct EventShared {
    threads_started: u32,
    surface_replaced: bool,
}

/// The two-thread synchronization core.
pub struct CombinedSynchronization {
    frame_time: Mutex<FrameTime>,
    trigger: Arc<dyn NotificationTrigger>,
    markers: Option<Arc<dyn MarkerSink>>,
    combined: Monitor<CombinedShared>,
    vsync: Monitor<VsyncShared>,
    event: Monitor<EventShared>,
    idle_frames_before_sleep: u32,
    frame_interval_micros: u64,
    /// Benign race; the vsync role reconciles its cache once per tick.
    vsyncs_per_render: AtomicU32,
}

impl CombinedSynchronization {
    /// Creates a core in the `Stopped` state.
    pub fn new(
        config: &PacingConfig,
        clock: Arc<dyn TimeSource>,
        trigger: Arc<dyn NotificationTrigger>,
        markers: Option<Arc<dyn MarkerSink>>,
    ) -> Self {
        Self {
            frame_time: Mutex::new(FrameTime::new(
                clock,
                config.minimum_frame_time_interval_micros(),
            )),
            trigger,
            markers,
            combined: Monitor::new(CombinedShared {
                state: SyncState::Stopped,
                vsync_ahead_of_update: 0,
                resuming: false,
                once: false,
                try_to_sleep_count: 0,
                new_surface: None,
                post_rendering: false,
                sync_frame_number: 0,
                sync_seconds: 0,
                sync_microseconds: 0,
            }),
            vsync: Monitor::new(VsyncShared {
                run: false,
                stop: false,
                initialised: false,
            }),
            event: Monitor::new(EventShared {
                threads_started: 0,
                surface_replaced: false,
            }),
            idle_frames_before_sleep: config.idle_frames_before_sleep,
            frame_interval_micros: config.frame_interval_micros,
            vsyncs_per_render: AtomicU32::new(config.vsyncs_per_render),
        }
    }

    ///////////////////////////////////////////////////////////////////////
    // Event thread API
    ///////////////////////////////////////////////////////////////////////

    /// Moves `Stopped` to `Initialising` and re-arms the startup barrier.
    pub fn initialise(&self) {
        let mut c = self.combined.lock();
        if c.state != SyncState::Stopped {
            return;
        }
        debug!(target: "metronome::sync", "combined: initialising");
        c.state = SyncState::Initialising;
        c.vsync_ahead_of_update = 0;
        c.resuming = false;
        c.once = false;
        c.try_to_sleep_count = 0;
        c.new_surface = None;
        c.post_rendering = false;
        drop(c);

        let mut v = self.vsync.lock();
        v.run = false;
        v.stop = false;
        v.initialised = false;
        drop(v);

        let mut e = self.event.lock();
        e.threads_started = 0;
        e.surface_replaced = false;
    }

    /// Releases the workers into `Running` once both have signalled the
    /// startup barrier. No-op unless `Initialising`.
    pub fn start(&self) {
        if self.combined.lock().state != SyncState::Initialising {
            return;
        }
        debug!(target: "metronome::sync", "combined: starting");

        let vsyncs_per_render = self.vsyncs_per_render.load(Ordering::Relaxed);
        self.frame_time.lock().set_minimum_frame_time_interval(
            u64::from(vsyncs_per_render) * self.frame_interval_micros,
        );

        {
            let mut e = self.event.lock();
            while e.threads_started < CREATED_THREAD_COUNT {
                self.event.wait(&mut e);
            }
        }

        self.combined.lock().state = SyncState::Running;
        self.combined.notify_all();
    }

    /// Stops the core; wakes every parked role. Idempotent.
    pub fn stop(&self) {
        {
            let mut c = self.combined.lock();
            if c.state == SyncState::Stopped {
                return;
            }
            c.state = SyncState::Stopped;
        }
        debug!(target: "metronome::sync", "combined: stopping");
        self.combined.notify_all();
        self.stop_vsync_role();
        self.frame_time.lock().suspend();
    }

    /// Pauses frame production. Legal only from `Running` or `Sleeping`.
    pub fn pause(&self) {
        let paused = {
            let mut c = self.combined.lock();
            if !c.state.can_pause() {
                false
            } else {
                c.state = SyncState::Paused;
                c.resuming = false;
                true
            }
        };
        if paused {
            debug!(target: "metronome::sync", "combined: paused");
            self.frame_time.lock().suspend();
            self.add_marker(PerformanceMarker::Paused);
        }
    }

    /// Resumes from `Paused` with the one-frame fast path.
    pub fn resume(&self) {
        let resumed = {
            let mut c = self.combined.lock();
            if c.state != SyncState::Paused {
                false
            } else {
                c.state = SyncState::Running;
                c.resuming = true;
                true
            }
        };
        if resumed {
            debug!(target: "metronome::sync", "combined: resumed");
            self.frame_time.lock().resume();
            self.combined.notify_all();
            self.add_marker(PerformanceMarker::Resume);
        }
    }

    /// Cancels an idle sleep; always clears the try-to-sleep debounce.
    pub fn update_request(&self) {
        let woke = {
            let mut c = self.combined.lock();
            c.try_to_sleep_count = 0;
            if c.state == SyncState::Sleeping {
                c.state = SyncState::Running;
                true
            } else {
                false
            }
        };
        if woke {
            self.combined.notify_all();
        }
    }

    /// Forces one extra frame regardless of state.
    pub fn update_once(&self) {
        {
            let mut c = self.combined.lock();
            if c.state == SyncState::Sleeping {
                c.state = SyncState::Running;
            }
            c.once = true;
        }
        self.combined.notify_all();
    }

    /// Deposits a new render target and blocks until the combined thread
    /// has swapped to it. Returns false when the core is stopped or still
    /// initialising.
    pub fn replace_surface(&self, new_surface: Box<dyn RenderSurface>) -> bool {
        // The completion flag must be cleared before the slot is visible,
        // or a fast combined thread can finish the swap first and the
        // completion would be lost.
        self.event.lock().surface_replaced = false;
        {
            let mut c = self.combined.lock();
            if !c.state.can_replace_surface() {
                return false;
            }
            // Every combined-thread wait predicate watches this slot, so
            // a parked or sleeping thread wakes to drain it.
            c.new_surface = Some(new_surface);
        }
        self.combined.notify_all();
        debug!(target: "metronome::sync", "combined: surface deposited");

        let mut e = self.event.lock();
        while !e.surface_replaced {
            self.event.wait(&mut e);
        }
        debug!(target: "metronome::sync", "combined: surface replaced");
        true
    }

    /// Updates the vsync-per-render divisor; effective at the vsync
    /// role's next tick.
    pub fn set_render_refresh_rate(&self, vsyncs_per_render: u32) {
        self.vsyncs_per_render
            .store(vsyncs_per_render, Ordering::Relaxed);
    }

    /// Releases a combined thread parked in
    /// [`post_render_wait_for_completion`](Self::post_render_wait_for_completion).
    pub fn post_render_complete(&self) {
        self.combined.lock().post_rendering = false;
        self.combined.notify_all();
    }

    ///////////////////////////////////////////////////////////////////////
    // Combined update/render thread entry points
    ///////////////////////////////////////////////////////////////////////

    /// Called by the combined loop once per iteration.
    ///
    /// Returns `None` when the loop must terminate; otherwise the frame
    /// tick plus, when a replacement is pending, the surface to swap to
    /// instead of rendering.
    pub fn update_render_ready(&self, notify_event: bool, run_update: bool) -> Option<CombinedPass> {
        let state = self.combined.lock().state;
        match state {
            SyncState::Stopped => {
                self.stop_vsync_role();
                return None;
            }
            SyncState::Initialising => {
                self.notify_thread_initialised();
                {
                    let mut c = self.combined.lock();
                    while c.state == SyncState::Initialising {
                        trace!(target: "metronome::sync", "combined: waiting for start");
                        self.combined.wait(&mut c);
                    }
                }
                if self.combined.lock().state != SyncState::Stopped {
                    self.run_vsync_role();
                }
            }
            SyncState::Paused => {
                // One bookkeeping pass before parking in the vsync wait.
                self.pause_vsync_role();
                self.running_pass(notify_event, run_update);
            }
            SyncState::Running => {
                self.running_pass(notify_event, run_update);
            }
            SyncState::Sleeping => {
                self.sleep_until_woken();
            }
            SyncState::ReplacingSurface => {
                // The combined core never enters this state; replacement
                // is slot-based.
                debug_assert!(false, "combined core observed ReplacingSurface");
            }
        }

        let (stopped, new_surface) = {
            let mut c = self.combined.lock();
            (c.state == SyncState::Stopped, c.new_surface.take())
        };
        if stopped {
            self.stop_vsync_role();
            // A deposited surface is still drained by the caller below so
            // the event thread's rendezvous can complete; but with the
            // loop terminating there is no caller, so complete it here.
            if new_surface.is_some() {
                self.surface_replaced();
            }
            return None;
        }

        let tick = self.frame_time.lock().predict_next_sync();
        self.add_marker(PerformanceMarker::UpdateStart);
        Some(CombinedPass { tick, new_surface })
    }

    /// Called by the combined loop after physically swapping the surface.
    pub fn surface_replaced(&self) {
        self.event.lock().surface_replaced = true;
        self.event.notify_all();
    }

    /// Marks the start of the post-render hold.
    pub fn post_render_started(&self) {
        self.combined.lock().post_rendering = true;
    }

    /// Parks the combined thread until the event thread releases the
    /// post-render hold. A pending surface replacement or a stop releases
    /// the hold early.
    pub fn post_render_wait_for_completion(&self) {
        let mut c = self.combined.lock();
        while c.post_rendering && c.new_surface.is_none() && c.state != SyncState::Stopped {
            trace!(target: "metronome::sync", "combined: post-render hold");
            self.combined.wait(&mut c);
        }
    }

    fn running_pass(&self, notify_event: bool, run_update: bool) {
        self.add_marker(PerformanceMarker::UpdateEnd);

        let resuming = {
            let mut c = self.combined.lock();
            if c.resuming {
                c.resuming = false;
                true
            } else {
                false
            }
        };
        if resuming {
            self.run_vsync_role();
        }

        if notify_event {
            self.trigger.trigger();
        }

        {
            let mut c = self.combined.lock();
            while c.state != SyncState::Stopped
                && c.vsync_ahead_of_update == 0
                && !c.once
                && !c.resuming
                && c.new_surface.is_none()
            {
                trace!(target: "metronome::sync", "combined: vsync wait");
                self.combined.wait(&mut c);
            }
            c.once = false;
            c.vsync_ahead_of_update = 0;
        }

        self.try_to_sleep(run_update);
    }

    fn try_to_sleep(&self, run_update: bool) {
        let resuming = self.combined.lock().resuming;
        if run_update || resuming {
            self.combined.lock().try_to_sleep_count = 0;
            return;
        }

        let threshold_reached = {
            let mut c = self.combined.lock();
            c.try_to_sleep_count += 1;
            c.try_to_sleep_count >= self.idle_frames_before_sleep
        };
        if !threshold_reached {
            return;
        }

        {
            let mut c = self.combined.lock();
            if c.state != SyncState::Running || c.new_surface.is_some() {
                return;
            }
            c.state = SyncState::Sleeping;
        }
        debug!(target: "metronome::sync", "combined: going to sleep");
        self.sleep_until_woken();
    }

    fn sleep_until_woken(&self) {
        self.pause_vsync_role();
        self.frame_time.lock().sleep();

        {
            let mut c = self.combined.lock();
            while c.state == SyncState::Sleeping && c.new_surface.is_none() {
                trace!(target: "metronome::sync", "combined: sleeping");
                self.combined.wait(&mut c);
            }
            c.vsync_ahead_of_update = 0;
            c.try_to_sleep_count = 0;
        }

        debug!(target: "metronome::sync", "combined: woken up");
        self.run_vsync_role();
        self.frame_time.lock().wake_up();
    }

    ///////////////////////////////////////////////////////////////////////
    // VSync thread entry point
    ///////////////////////////////////////////////////////////////////////

    /// Called by the vsync loop once per tick; same contract as the
    /// three-thread core's
    /// [`vsync_ready`](crate::ThreadSynchronization::vsync_ready).
    pub fn vsync_ready(
        &self,
        valid_sync: bool,
        frame_number: u32,
        seconds: u32,
        microseconds: u32,
        vsyncs_per_render: &mut u32,
    ) -> bool {
        let configured = self.vsyncs_per_render.load(Ordering::Relaxed);
        if *vsyncs_per_render != configured {
            *vsyncs_per_render = configured;
            self.frame_time.lock().set_minimum_frame_time_interval(
                u64::from(configured) * self.frame_interval_micros,
            );
        }

        if valid_sync {
            self.frame_time.lock().set_sync_time(frame_number);
            self.add_marker(PerformanceMarker::VSync);

            let first = {
                let mut v = self.vsync.lock();
                if v.initialised {
                    false
                } else {
                    v.initialised = true;
                    true
                }
            };

            if first {
                self.notify_thread_initialised();
            } else {
                {
                    let mut c = self.combined.lock();
                    c.vsync_ahead_of_update += 1;
                    c.sync_frame_number = frame_number;
                    c.sync_seconds = seconds;
                    c.sync_microseconds = microseconds;
                }
                self.combined.notify_all();
            }

            let mut v = self.vsync.lock();
            while !v.run && !v.stop {
                trace!(target: "metronome::sync", "combined: vsync paused");
                self.vsync.wait(&mut v);
            }
            !v.stop
        } else {
            !self.vsync.lock().stop
        }
    }

    ///////////////////////////////////////////////////////////////////////
    // Observability
    ///////////////////////////////////////////////////////////////////////

    /// Current lifecycle state, for instrumentation and tests.
    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.combined.lock().state
    }

    /// Frame number of the latest vsync tick.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        self.combined.lock().sync_frame_number
    }

    /// Timestamp of the latest vsync tick in microseconds.
    #[must_use]
    pub fn sync_time_micros(&self) -> u64 {
        let c = self.combined.lock();
        u64::from(c.sync_seconds) * 1_000_000 + u64::from(c.sync_microseconds)
    }

    ///////////////////////////////////////////////////////////////////////
    // Private helpers
    ///////////////////////////////////////////////////////////////////////

    fn notify_thread_initialised(&self) {
        {
            let mut e = self.event.lock();
            e.threads_started += 1;
            debug_assert!(e.threads_started <= CREATED_THREAD_COUNT);
        }
        self.event.notify_all();
    }

    fn run_vsync_role(&self) {
        self.vsync.lock().run = true;
        self.vsync.notify_all();
    }

    fn pause_vsync_role(&self) {
        self.vsync.lock().run = false;
    }

    fn stop_vsync_role(&self) {
        self.vsync.lock().stop = true;
        self.vsync.notify_all();
    }

    fn add_marker(&self, marker: PerformanceMarker) {
        if let Some(sink) = &self.markers {
            sink.add_marker(marker);
        }
    }
}

impl std::fmt::Debug for CombinedSynchronization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedSynchronization")
            .field("state", &self.current_state())
            .finish()
    }
}
