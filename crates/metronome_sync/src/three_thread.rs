//! # Three-Thread Synchronization Core
//!
//! Coordinates an independent update thread, render thread and vsync
//! thread against the event thread's lifecycle API.
//!
//! ## Protocol sketch
//!
//! ```text
//!  vsync ──(vsync_ahead_of_update)──▶ update ──(update_ahead_of_render)──▶ render
//!            consumed per frame                 bounded by max_frames_ahead
//! ```
//!
//! - The vsync role banks ticks in `vsync_ahead_of_update`; the update
//!   role drains the bank once per frame and parks when it is empty.
//! - The update role banks prepared frames in `update_ahead_of_render`;
//!   the render role drains one per frame, and the update role parks when
//!   the bank reaches the configured pipeline depth (back-pressure).
//! - `start()` parks the event thread on a rendezvous barrier until all
//!   three workers have signalled that they are alive, so the first vsync
//!   tick can never be consumed before every role exists.
//! - `replace_surface()` parks the event thread until the render role has
//!   swapped the target and signalled completion, then restores the
//!   pre-replacement state.
//!
//! Each waiting thread has its own monitor; the state machine itself is
//! mutated only under the update monitor (the primary lock). The vsync
//! and render roles carry mirror run/stop flags in their own monitors so
//! a stop is observable from any wait without a cross-monitor predicate.

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
const CREATED_THREAD_COUNT: u32 = 3;

/// What the render loop must do this iteration.
pub enum RenderDirective {
    /// Render the most recently prepared frame.
    Render,
    /// Do not render; replace the current surface with this one, then
    /// call [`ThreadSynchronization::render_informs_surface_replaced`].
    ReplaceSurface(Box<dyn RenderSurface>),
    /// Terminate the render loop.
    Stop,
}

impl std::fmt::Debug for RenderDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Render => f.write_str("Render"),
            Self::ReplaceSurface(_) => f.write_str("ReplaceSurface(..)"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Fields guarded by the update monitor (the primary lock).
struct UpdateShared {
    state: SyncState,
    /// Ticks banked by the vsync role, drained by the update role.
    vsync_ahead_of_update: u32,
    /// One-shot: the next update pass skips the vsync wait and restarts
    /// the vsync role (set by `resume`).
    resuming: bool,
    /// One-shot: force a single frame through the vsync wait regardless
    /// of state (set by `update_once`).
    once: bool,
    /// Consecutive idle frames observed; sleep begins at the threshold.
    try_to_sleep_count: u32,
    /// Latest sync sample, for the frame-number/time accessors.
    sync_frame_number: u32,
    sync_seconds: u32,
    sync_microseconds: u32,
}

/// Fields guarded by the render monitor.
struct RenderShared {
    /// Frames banked by the update role, drained by the render role.
    update_ahead_of_render: u32,
    /// Mirror of the stopped state, so render-side waits need no other
    /// monitor.
    stop: bool,
    /// Deposited by the event thread, drained exactly once by the render
    /// role.
    replace_request: Option<Box<dyn RenderSurface>>,
    /// The render thread has signalled the startup barrier.
    initialised: bool,
    /// The previous iteration serviced a replacement, so the next one
    /// must not decrement the frame bank.
    skip_decrement: bool,
}

/// Fields guarded by the vsync monitor.
struct VsyncShared {
    /// The update role allows the vsync role to tick.
    run: bool,
    /// Mirror of the stopped state.
    stop: bool,
    /// The vsync thread has signalled the startup barrier.
    initialised: bool,
}

/// Fields guarded by the event monitor.
struct EventShared {
    /// Workers alive; `start()` parks until all of them have signalled.
    threads_started: u32,
    /// The render role completed the in-flight surface replacement.
    surface_replaced: bool,
}

/// The three-thread synchronization core.
///
/// The event thread owns the lifecycle API; each worker loop calls its
/// `*_ready` entry point once per iteration and terminates when told to.
pub struct ThreadSynchronization {
    frame_time: Mutex<FrameTime>,
    trigger: Arc<dyn NotificationTrigger>,
    markers: Option<Arc<dyn MarkerSink>>,
    update: Monitor<UpdateShared>,
    render: Monitor<RenderShared>,
    vsync: Monitor<VsyncShared>,
    event: Monitor<EventShared>,
    /// Pipeline depth bound for `update_ahead_of_render`.
    max_frames_ahead: u32,
    idle_frames_before_sleep: u32,
    frame_interval_micros: u64,
    /// Read/written without the primary lock; the vsync role reconciles
    /// its cached copy once per tick (benign race).
    vsyncs_per_render: AtomicU32,
}

impl ThreadSynchronization {
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
            update: Monitor::new(UpdateShared {
                state: SyncState::Stopped,
                vsync_ahead_of_update: 0,
                resuming: false,
                once: false,
                try_to_sleep_count: 0,
                sync_frame_number: 0,
                sync_seconds: 0,
                sync_microseconds: 0,
            }),
            render: Monitor::new(RenderShared {
                update_ahead_of_render: 0,
                stop: false,
                replace_request: None,
                initialised: false,
                skip_decrement: false,
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
            max_frames_ahead: config.max_frames_ahead,
            idle_frames_before_sleep: config.idle_frames_before_sleep,
            frame_interval_micros: config.frame_interval_micros,
            vsyncs_per_render: AtomicU32::new(config.vsyncs_per_render),
        }
    }

    ///////////////////////////////////////////////////////////////////////
    // Event thread API
    ///////////////////////////////////////////////////////////////////////

    /// Moves `Stopped` to `Initialising` and re-arms the startup barrier.
    /// No-op in any other state. Does not block.
    pub fn initialise(&self) {
        let mut u = self.update.lock();
        if u.state != SyncState::Stopped {
            return;
        }
        debug!(target: "metronome::sync", "initialising");
        u.state = SyncState::Initialising;
        u.vsync_ahead_of_update = 0;
        u.resuming = false;
        u.once = false;
        u.try_to_sleep_count = 0;
        drop(u);

        let mut r = self.render.lock();
        r.update_ahead_of_render = 0;
        r.stop = false;
        r.replace_request = None;
        r.initialised = false;
        r.skip_decrement = false;
        drop(r);

        let mut v = self.vsync.lock();
        v.run = false;
        v.stop = false;
        v.initialised = false;
        drop(v);

        let mut e = self.event.lock();
        e.threads_started = 0;
        e.surface_replaced = false;
    }

    /// Releases the worker threads into `Running`.
    ///
    /// Blocks until all three workers have signalled that they are alive,
    /// so the first frame is never lost. No-op unless `Initialising`.
    pub fn start(&self) {
        if self.update.lock().state != SyncState::Initialising {
            return;
        }
        debug!(target: "metronome::sync", "starting");

        let vsyncs_per_render = self.vsyncs_per_render.load(Ordering::Relaxed);
        self.frame_time.lock().set_minimum_frame_time_interval(
            u64::from(vsyncs_per_render) * self.frame_interval_micros,
        );

        {
            let mut e = self.event.lock();
            while e.threads_started < CREATED_THREAD_COUNT {
                trace!(target: "metronome::sync", started = e.threads_started, "start: barrier wait");
                self.event.wait(&mut e);
            }
        }

        self.update.lock().state = SyncState::Running;
        self.update.notify_all();
    }

    /// Stops the core. Wakes every parked role; each observes the stop on
    /// its next predicate check and terminates. Idempotent.
    pub fn stop(&self) {
        {
            let mut u = self.update.lock();
            if u.state == SyncState::Stopped {
                return;
            }
            u.state = SyncState::Stopped;
        }
        debug!(target: "metronome::sync", "stopping");
        self.update.notify_all();

        // Mirror flags keep render/vsync waits free of cross-monitor
        // predicates; the update role re-propagates these (idempotent).
        self.stop_render_role();
        self.stop_vsync_role();

        self.frame_time.lock().suspend();
    }

    /// Pauses frame production. Legal only from `Running` or `Sleeping`.
    pub fn pause(&self) {
        let paused = {
            let mut u = self.update.lock();
            if !u.state.can_pause() {
                false
            } else {
                u.state = SyncState::Paused;
                u.resuming = false;
                true
            }
        };
        if paused {
            debug!(target: "metronome::sync", "paused");
            self.frame_time.lock().suspend();
            self.add_marker(PerformanceMarker::Paused);
        }
    }

    /// Resumes from `Paused`, forcing exactly one frame through without
    /// waiting for a fresh vsync tick.
    pub fn resume(&self) {
        let resumed = {
            let mut u = self.update.lock();
            if u.state != SyncState::Paused {
                false
            } else {
                u.state = SyncState::Running;
                u.resuming = true;
                true
            }
        };
        if resumed {
            debug!(target: "metronome::sync", "resumed");
            self.frame_time.lock().resume();
            self.update.notify_all();
            self.add_marker(PerformanceMarker::Resume);
        }
    }

    /// Cancels an idle sleep because new scene messages were queued.
    /// Always clears the try-to-sleep debounce.
    pub fn update_request(&self) {
        let woke = {
            let mut u = self.update.lock();
            u.try_to_sleep_count = 0;
            if u.state == SyncState::Sleeping {
                u.state = SyncState::Running;
                true
            } else {
                false
            }
        };
        if woke {
            trace!(target: "metronome::sync", "update request: waking");
            self.update.notify_all();
        }
    }

    /// Forces one extra update frame regardless of state ("render one
    /// frame even while paused"). Wakes a sleeping core.
    pub fn update_once(&self) {
        {
            let mut u = self.update.lock();
            if u.state == SyncState::Sleeping {
                u.state = SyncState::Running;
            }
            u.once = true;
        }
        self.update.notify_all();
    }

    /// Atomically swaps the render target.
    ///
    /// Blocks the caller until the render role has serviced exactly one
    /// replacement, then restores the pre-replacement state. Returns
    /// false (without blocking) when the core is stopped or still
    /// initialising.
    pub fn replace_surface(&self, new_surface: Box<dyn RenderSurface>) -> bool {
        let previous_state = {
            let mut u = self.update.lock();
            if !u.state.can_replace_surface() {
                return false;
            }
            let previous = u.state;
            u.state = SyncState::ReplacingSurface;
            previous
        };
        debug!(target: "metronome::sync", ?previous_state, "replacing surface");

        self.event.lock().surface_replaced = false;
        self.render.lock().replace_request = Some(new_surface);
        self.render.notify_all();
        // The update role may be parked in a sleep wait; it re-parks in
        // its replacing-surface arm until the state is restored.
        self.update.notify_all();

        {
            let mut e = self.event.lock();
            while !e.surface_replaced {
                trace!(target: "metronome::sync", "replace surface: waiting for render role");
                self.event.wait(&mut e);
            }
        }

        self.update.lock().state = previous_state;
        self.update.notify_all();
        debug!(target: "metronome::sync", "surface replaced");
        true
    }

    /// Updates the number of vsync ticks per rendered frame. Takes effect
    /// on the vsync role's next tick; not atomic with in-flight frames.
    pub fn set_render_refresh_rate(&self, vsyncs_per_render: u32) {
        self.vsyncs_per_render
            .store(vsyncs_per_render, Ordering::Relaxed);
    }

    ///////////////////////////////////////////////////////////////////////
    // Update thread entry point
    ///////////////////////////////////////////////////////////////////////

    /// Called by the update loop once per iteration, before stepping the
    /// scene.
    ///
    /// `notify_event` fires the event-loop trigger; `run_update` is the
    /// scene's keep-updating flag from the previous step (false feeds the
    /// try-to-sleep debounce). Blocks until a vsync tick is available.
    /// Returns `None` when the update loop must terminate.
    pub fn update_ready(&self, notify_event: bool, run_update: bool) -> Option<FrameTick> {
        let state = self.update.lock().state;
        match state {
            SyncState::Stopped => {
                self.stop_vsync_role();
                self.stop_render_role();
                return None;
            }
            SyncState::Initialising => {
                self.notify_thread_initialised();
                {
                    let mut u = self.update.lock();
                    while u.state == SyncState::Initialising {
                        trace!(target: "metronome::sync", "update: waiting for start");
                        self.update.wait(&mut u);
                    }
                }
                if !self.is_stopping() {
                    self.run_vsync_role();
                }
            }
            SyncState::Paused => {
                // A paused update loop still performs one bookkeeping pass
                // before parking in the vsync wait below.
                self.pause_vsync_role();
                self.running_pass(notify_event, run_update);
            }
            SyncState::Running => {
                self.running_pass(notify_event, run_update);
            }
            SyncState::Sleeping => {
                // Only reachable when an external wake (e.g. a surface
                // replacement) pushed a frame through while asleep.
                self.sleep_until_woken();
            }
            SyncState::ReplacingSurface => {
                self.wait_while_replacing_surface();
            }
        }

        // The state may have become Stopped during any wait above.
        if self.is_stopping() {
            self.stop_vsync_role();
            self.stop_render_role();
            return None;
        }

        // A replacement may have been requested while we were waiting;
        // park until the render role has finished it.
        if self.update.lock().state == SyncState::ReplacingSurface {
            self.wait_while_replacing_surface();
            if self.is_stopping() {
                self.stop_vsync_role();
                self.stop_render_role();
                return None;
            }
        }

        let tick = self.frame_time.lock().predict_next_sync();
        self.add_marker(PerformanceMarker::UpdateStart);
        Some(tick)
    }

    /// The RUNNING-state body, also entered from PAUSED for the one
    /// bookkeeping pass.
    fn running_pass(&self, notify_event: bool, run_update: bool) {
        self.add_marker(PerformanceMarker::UpdateEnd);

        let resuming = {
            let mut u = self.update.lock();
            if u.resuming {
                u.resuming = false;
                true
            } else {
                false
            }
        };
        if resuming {
            trace!(target: "metronome::sync", "update: resuming, restarting vsync role");
            self.run_vsync_role();
        }

        if notify_event {
            // Fire first so the event thread can start processing while
            // this thread waits for the next tick.
            self.trigger.trigger();
        }

        // Publish the prepared frame and honour the pipeline bound.
        {
            let mut r = self.render.lock();
            r.update_ahead_of_render += 1;
            debug_assert!(r.update_ahead_of_render <= self.max_frames_ahead);
            trace!(
                target: "metronome::sync",
                update_ahead_of_render = r.update_ahead_of_render,
                "update: frame published"
            );
            self.render.notify_all();
            while r.update_ahead_of_render >= self.max_frames_ahead && !r.stop {
                trace!(target: "metronome::sync", "update: back-pressure wait");
                self.render.wait(&mut r);
            }
        }

        // Consume a banked tick, or park until one arrives. `resuming`
        // and `once` punch through so a resume or forced frame never
        // waits on the display.
        {
            let mut u = self.update.lock();
            while u.state != SyncState::Stopped
                && u.vsync_ahead_of_update == 0
                && !u.once
                && !u.resuming
            {
                trace!(target: "metronome::sync", "update: vsync wait");
                self.update.wait(&mut u);
            }
            u.once = false;
            u.vsync_ahead_of_update = 0;
        }

        self.try_to_sleep(run_update);
    }

    /// Debounced idle-sleep entry: three consecutive idle frames put the
    /// core to sleep until an `update_request` (or similar) wakes it.
    fn try_to_sleep(&self, run_update: bool) {
        let resuming = self.update.lock().resuming;
        if run_update || resuming {
            self.update.lock().try_to_sleep_count = 0;
            return;
        }

        let threshold_reached = {
            let mut u = self.update.lock();
            u.try_to_sleep_count += 1;
            u.try_to_sleep_count >= self.idle_frames_before_sleep
        };
        if !threshold_reached {
            return;
        }

        {
            let mut u = self.update.lock();
            // Sleep is only entered from Running; a stop or replacement
            // that raced in wins.
            if u.state != SyncState::Running {
                return;
            }
            u.state = SyncState::Sleeping;
        }
        debug!(target: "metronome::sync", "going to sleep");
        self.sleep_until_woken();
    }

    /// Parks the update role while `Sleeping`, with the vsync role paused
    /// and the predictor told about the gap.
    fn sleep_until_woken(&self) {
        self.pause_vsync_role();
        self.frame_time.lock().sleep();

        {
            let mut u = self.update.lock();
            while u.state == SyncState::Sleeping {
                trace!(target: "metronome::sync", "update: sleeping");
                self.update.wait(&mut u);
            }
            u.vsync_ahead_of_update = 0;
            u.try_to_sleep_count = 0;
        }

        debug!(target: "metronome::sync", "woken up");
        self.run_vsync_role();
        self.frame_time.lock().wake_up();
    }

    /// Parks the update role while a surface replacement is in flight,
    /// with the vsync role paused around the wait.
    fn wait_while_replacing_surface(&self) {
        self.pause_vsync_role();
        {
            let mut u = self.update.lock();
            while u.state == SyncState::ReplacingSurface {
                trace!(target: "metronome::sync", "update: replacing-surface wait");
                self.update.wait(&mut u);
            }
        }
        self.run_vsync_role();
    }

    ///////////////////////////////////////////////////////////////////////
    // Render thread entry point
    ///////////////////////////////////////////////////////////////////////

    /// Called by the render loop once per iteration.
    ///
    /// Blocks until a prepared frame, a surface replacement or a stop is
    /// available. A pending replacement is serviced even when a stop is
    /// also indicated, so the event thread's rendezvous always completes.
    pub fn render_ready(&self) -> RenderDirective {
        let first = {
            let mut r = self.render.lock();
            if r.initialised {
                false
            } else {
                r.initialised = true;
                true
            }
        };

        if first {
            self.notify_thread_initialised();
        } else {
            let rendered = {
                let mut r = self.render.lock();
                if r.stop {
                    // Accounting is moot once a stop is indicated.
                    false
                } else if r.skip_decrement {
                    r.skip_decrement = false;
                    false
                } else {
                    debug_assert!(r.update_ahead_of_render > 0);
                    r.update_ahead_of_render -= 1;
                    trace!(
                        target: "metronome::sync",
                        update_ahead_of_render = r.update_ahead_of_render,
                        "render: frame consumed"
                    );
                    true
                }
            };
            if rendered {
                self.add_marker(PerformanceMarker::RenderEnd);
                // A back-pressured update role parks on this monitor.
                self.render.notify_all();
            }
        }

        let directive = {
            let mut r = self.render.lock();
            while r.update_ahead_of_render == 0 && !r.stop && r.replace_request.is_none() {
                trace!(target: "metronome::sync", "render: wait");
                self.render.wait(&mut r);
            }
            if let Some(surface) = r.replace_request.take() {
                r.skip_decrement = true;
                RenderDirective::ReplaceSurface(surface)
            } else if r.stop {
                RenderDirective::Stop
            } else {
                RenderDirective::Render
            }
        };

        if matches!(directive, RenderDirective::Render) {
            self.add_marker(PerformanceMarker::RenderStart);
        }
        directive
    }

    /// Called by the render loop after physically swapping the surface;
    /// completes the event thread's rendezvous.
    pub fn render_informs_surface_replaced(&self) {
        self.event.lock().surface_replaced = true;
        self.event.notify_all();
    }

    ///////////////////////////////////////////////////////////////////////
    // VSync thread entry point
    ///////////////////////////////////////////////////////////////////////

    /// Called by the vsync loop once per tick.
    ///
    /// `valid_sync` is false for spurious wakes; they run the loop but
    /// feed nothing. `vsyncs_per_render` is the loop's cached copy of the
    /// configured refresh divisor, reconciled here. Blocks while the
    /// update role has the vsync role paused. Returns false when the
    /// vsync loop must terminate.
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
                    let mut u = self.update.lock();
                    u.vsync_ahead_of_update += 1;
                    u.sync_frame_number = frame_number;
                    u.sync_seconds = seconds;
                    u.sync_microseconds = microseconds;
                    trace!(
                        target: "metronome::sync",
                        vsync_ahead_of_update = u.vsync_ahead_of_update,
                        "vsync: tick banked"
                    );
                }
                self.update.notify_all();
            }

            let mut v = self.vsync.lock();
            while !v.run && !v.stop {
                trace!(target: "metronome::sync", "vsync: paused");
                self.vsync.wait(&mut v);
            }
            !v.stop
        } else {
            trace!(target: "metronome::sync", "vsync: invalid tick");
            !self.vsync.lock().stop
        }
    }

    ///////////////////////////////////////////////////////////////////////
    // Observability
    ///////////////////////////////////////////////////////////////////////

    /// Current lifecycle state, for instrumentation and tests.
    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.update.lock().state
    }

    /// Frame number of the latest vsync tick.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        self.update.lock().sync_frame_number
    }

    /// Timestamp of the latest vsync tick in microseconds.
    #[must_use]
    pub fn sync_time_micros(&self) -> u64 {
        let u = self.update.lock();
        u64::from(u.sync_seconds) * 1_000_000 + u64::from(u.sync_microseconds)
    }

    ///////////////////////////////////////////////////////////////////////
    // Private helpers
    ///////////////////////////////////////////////////////////////////////

    fn is_stopping(&self) -> bool {
        self.update.lock().state == SyncState::Stopped
    }

    /// Called by each worker when it is up; releases `start()` once all
    /// have arrived.
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

    fn stop_render_role(&self) {
        self.render.lock().stop = true;
        self.render.notify_all();
    }

    fn add_marker(&self, marker: PerformanceMarker) {
        if let Some(sink) = &self.markers {
            sink.add_marker(marker);
        }
    }
}

impl std::fmt::Debug for ThreadSynchronization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSynchronization")
            .field("state", &self.current_state())
            .field("max_frames_ahead", &self.max_frames_ahead)
            .finish()
    }
}
