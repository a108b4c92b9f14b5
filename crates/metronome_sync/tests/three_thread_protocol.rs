//! # Three-Thread Protocol Verification
//!
//! Drives the real `ThreadSynchronization` core with one thread per role
//! and a scripted vsync source (ticks delivered over a channel, timestamps
//! from a manually advanced clock), then asserts the observable protocol
//! properties:
//!
//! 1. `start()` releases only after every role has signalled it is alive
//! 2. Frames advance in lock-step with delivered ticks
//! 3. Pause/resume produces exactly one frame without a fresh tick
//! 4. Three idle frames enter sleep; `update_request()` wakes within one
//!    scheduling step
//! 5. Surface replacement is a state-preserving round trip
//! 6. The pipeline-depth bound holds under a slow renderer
//! 7. `stop()` is idempotent and terminates all three roles
//!
//! Run with: cargo test --test three_thread_protocol

use crossbeam_channel::{unbounded, Sender};
use metronome_core::surface::RenderSurface;
use metronome_core::time::ManualClock;
use metronome_core::trigger::ChannelTrigger;
use metronome_core::{PacingConfig, TimeSource};
use metronome_sync::{FrameTick, RenderDirective, SyncState, ThreadSynchronization};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const INTERVAL: u64 = 16_667;

struct TestSurface;

impl RenderSurface for TestSurface {
    fn start_render(&mut self) {}
    fn pre_render(&mut self) -> bool {
        true
    }
    fn post_render(&mut self, _frame_delta_micros: u64) {}
    fn stop_render(&mut self) {}
}

/// A running core plus its three role threads and the tick script.
struct Rig {
    sync: Arc<ThreadSynchronization>,
    clock: Arc<ManualClock>,
    tick_tx: Sender<()>,
    /// Frames the update role has been released for.
    frames: Arc<AtomicU32>,
    /// Frames the render role has drawn.
    rendered: Arc<AtomicU32>,
    /// Surface replacements the render role has serviced.
    replaced: Arc<AtomicU32>,
    /// Whether the update role reports the scene has work.
    run_update: Arc<AtomicBool>,
    ticks: Arc<parking_lot::Mutex<Vec<FrameTick>>>,
    update_thread: JoinHandle<()>,
    render_thread: JoinHandle<()>,
    vsync_thread: JoinHandle<bool>,
    /// Slow the render role down by this much per frame, for back-pressure
    /// stress.
    _render_delay: Duration,
}

fn spawn_rig(config: &PacingConfig, render_delay: Duration) -> Rig {
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let (trigger, _notifications) = ChannelTrigger::new();
    let sync = Arc::new(ThreadSynchronization::new(
        config,
        Arc::clone(&clock) as Arc<dyn TimeSource>,
        Arc::new(trigger),
        None,
    ));

    let frames = Arc::new(AtomicU32::new(0));
    let rendered = Arc::new(AtomicU32::new(0));
    let replaced = Arc::new(AtomicU32::new(0));
    let run_update = Arc::new(AtomicBool::new(true));
    let ticks = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (tick_tx, tick_rx) = unbounded::<()>();

    sync.initialise();

    let update_thread = {
        let sync = Arc::clone(&sync);
        let frames = Arc::clone(&frames);
        let run_update = Arc::clone(&run_update);
        let ticks = Arc::clone(&ticks);
        thread::spawn(move || {
            while let Some(tick) = sync.update_ready(false, run_update.load(Ordering::SeqCst)) {
                ticks.lock().push(tick);
                frames.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let render_thread = {
        let sync = Arc::clone(&sync);
        let rendered = Arc::clone(&rendered);
        let replaced = Arc::clone(&replaced);
        thread::spawn(move || loop {
            match sync.render_ready() {
                RenderDirective::Render => {
                    if !render_delay.is_zero() {
                        thread::sleep(render_delay);
                    }
                    rendered.fetch_add(1, Ordering::SeqCst);
                }
                RenderDirective::ReplaceSurface(_surface) => {
                    replaced.fetch_add(1, Ordering::SeqCst);
                    sync.render_informs_surface_replaced();
                }
                RenderDirective::Stop => break,
            }
        })
    };

    let vsync_thread = {
        let sync = Arc::clone(&sync);
        let clock = Arc::clone(&clock);
        thread::spawn(move || {
            let mut vsyncs_per_render = 1;
            let mut frame_number = 0;
            let mut alive = true;
            while alive && tick_rx.recv().is_ok() {
                frame_number += 1;
                let now = clock.now_micros();
                alive = sync.vsync_ready(
                    true,
                    frame_number,
                    (now / 1_000_000) as u32,
                    (now % 1_000_000) as u32,
                    &mut vsyncs_per_render,
                );
            }
            alive
        })
    };

    Rig {
        sync,
        clock,
        tick_tx,
        frames,
        rendered,
        replaced,
        run_update,
        ticks,
        update_thread,
        render_thread,
        vsync_thread,
        _render_delay: render_delay,
    }
}

impl Rig {
    /// Advances the clock one display period and delivers a tick.
    fn tick(&self) {
        self.clock.advance(INTERVAL);
        self.tick_tx.send(()).expect("vsync role gone");
    }

    fn frames(&self) -> u32 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Polls until `predicate` holds, failing the test after two seconds.
    fn wait_until(&self, what: &str, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stops the core and joins all three role threads.
    fn shutdown(self) -> (Arc<ThreadSynchronization>, bool) {
        self.sync.stop();
        self.update_thread.join().expect("update role panicked");
        self.render_thread.join().expect("render role panicked");
        // Unblock the vsync thread's channel wait so it observes the stop.
        let _ = self.tick_tx.send(());
        let vsync_alive = self.vsync_thread.join().expect("vsync role panicked");
        (self.sync, vsync_alive)
    }
}

/// Brings a rig from `Initialising` to `Running`. Delivers the first tick
/// (which the vsync role uses to signal the startup barrier) and then
/// blocks in `start()` until all roles are alive.
fn start_rig(rig: &Rig) {
    rig.tick();
    rig.sync.start();
    assert_eq!(rig.sync.current_state(), SyncState::Running);
}

// ============================================================================
// STARTUP BARRIER
// ============================================================================

#[test]
fn start_blocks_until_all_roles_are_alive() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);

    // start() on a helper thread: it must not return before the vsync role
    // has observed its first tick, because the barrier needs all three
    // roles.
    let started = Arc::new(AtomicBool::new(false));
    let starter = {
        let sync = Arc::clone(&rig.sync);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            sync.start();
            started.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(
        !started.load(Ordering::SeqCst),
        "start() returned before the vsync role signalled the barrier"
    );

    rig.tick();
    starter.join().unwrap();
    assert!(started.load(Ordering::SeqCst));
    assert_eq!(rig.sync.current_state(), SyncState::Running);

    rig.shutdown();
}

// ============================================================================
// LOCK-STEP FRAME PRODUCTION
// ============================================================================

#[test]
fn frames_advance_with_ticks_and_sync_times_are_monotonic() {
    let config = PacingConfig {
        vsyncs_per_render: 1,
        max_frames_ahead: 1,
        ..PacingConfig::default()
    };
    let rig = spawn_rig(&config, Duration::ZERO);
    start_rig(&rig);

    // First frame is released by start() itself, without a banked tick.
    rig.wait_until("first frame", || rig.frames() >= 1);

    rig.tick();
    rig.wait_until("second frame", || rig.frames() >= 2);
    rig.tick();
    rig.wait_until("third frame", || rig.frames() >= 3);

    {
        let ticks = rig.ticks.lock();
        for pair in ticks.windows(2) {
            assert!(pair[1].last_sync_time_ms >= pair[0].last_sync_time_ms);
            assert!(pair[1].next_sync_time_ms >= pair[0].next_sync_time_ms);
        }
        for tick in ticks.iter() {
            assert!(tick.next_sync_time_ms > tick.last_sync_time_ms);
        }
    }

    let (sync, vsync_alive) = rig.shutdown();

    // After a stop every role entry point reports "terminate".
    assert!(!vsync_alive);
    assert!(sync.update_ready(false, true).is_none());
    assert!(matches!(sync.render_ready(), RenderDirective::Stop));
    let mut vsyncs_per_render = 1;
    assert!(!sync.vsync_ready(true, 99, 0, 0, &mut vsyncs_per_render));
}

// ============================================================================
// PAUSE / RESUME FAST PATH
// ============================================================================

#[test]
fn resume_produces_exactly_one_frame_without_a_fresh_tick() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    start_rig(&rig);

    rig.tick();
    rig.wait_until("frames before pause", || rig.frames() >= 2);

    rig.sync.pause();
    assert_eq!(rig.sync.current_state(), SyncState::Paused);

    // Let the paused update role finish its bookkeeping pass and park.
    thread::sleep(Duration::from_millis(30));
    let frames_at_pause = rig.frames();

    rig.sync.resume();
    assert_eq!(rig.sync.current_state(), SyncState::Running);

    // Exactly one frame, with no tick delivered.
    rig.wait_until("the resume frame", || rig.frames() == frames_at_pause + 1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(
        rig.frames(),
        frames_at_pause + 1,
        "resume fast path must force a single frame"
    );

    rig.shutdown();
}

#[test]
fn update_once_forces_a_frame_while_paused() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    start_rig(&rig);

    rig.sync.pause();
    thread::sleep(Duration::from_millis(20));
    let frames_at_pause = rig.frames();

    rig.sync.update_once();
    rig.wait_until("the forced frame", || rig.frames() == frames_at_pause + 1);

    // Still paused; the forced frame does not resume the core.
    assert_eq!(rig.sync.current_state(), SyncState::Paused);

    rig.shutdown();
}

// ============================================================================
// IDLE SLEEP
// ============================================================================

#[test]
fn three_idle_frames_enter_sleep_and_update_request_wakes() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    rig.run_update.store(false, Ordering::SeqCst);
    start_rig(&rig);

    // Keep ticks flowing until the idle debounce trips.
    let deadline = Instant::now() + Duration::from_secs(2);
    while rig.sync.current_state() != SyncState::Sleeping {
        assert!(Instant::now() < deadline, "core never went to sleep");
        rig.tick();
        thread::sleep(Duration::from_millis(2));
    }

    let frames_at_sleep = rig.frames();

    // No ticks are being delivered: the sleeping core must stay quiet.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(rig.frames(), frames_at_sleep);

    // Newly queued scene messages cancel the sleep.
    rig.run_update.store(true, Ordering::SeqCst);
    rig.sync.update_request();
    rig.wait_until("wake from sleep", || {
        rig.sync.current_state() == SyncState::Running
    });
    rig.wait_until("post-wake frame", || rig.frames() > frames_at_sleep);

    rig.shutdown();
}

// ============================================================================
// SURFACE REPLACEMENT
// ============================================================================

#[test]
fn replace_surface_round_trips_and_preserves_state() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    start_rig(&rig);

    rig.tick();
    rig.wait_until("steady state", || rig.frames() >= 2);

    assert!(rig.sync.replace_surface(Box::new(TestSurface)));
    assert_eq!(rig.sync.current_state(), SyncState::Running);
    assert_eq!(rig.replaced.load(Ordering::SeqCst), 1);

    // Frames keep flowing afterwards.
    let frames_after_replace = rig.frames();
    rig.tick();
    rig.wait_until("frame after replace", || rig.frames() > frames_after_replace);

    rig.shutdown();
}

#[test]
fn replace_surface_while_paused_restores_paused() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    start_rig(&rig);

    rig.sync.pause();
    thread::sleep(Duration::from_millis(20));

    assert!(rig.sync.replace_surface(Box::new(TestSurface)));
    assert_eq!(rig.sync.current_state(), SyncState::Paused);
    assert_eq!(rig.replaced.load(Ordering::SeqCst), 1);

    rig.shutdown();
}

// ============================================================================
// PIPELINE BOUND
// ============================================================================

#[test]
fn update_never_outruns_render_by_more_than_the_bound() {
    let config = PacingConfig {
        max_frames_ahead: 2,
        ..PacingConfig::default()
    };
    // A slow renderer forces the back-pressure path.
    let rig = spawn_rig(&config, Duration::from_millis(2));
    start_rig(&rig);

    for _ in 0..30 {
        rig.tick();
        thread::sleep(Duration::from_millis(1));
        let produced = rig.frames();
        let consumed = rig.rendered.load(Ordering::SeqCst);
        assert!(produced >= consumed, "pipeline counter went negative");
        // `frames` counts released update passes; at most `max_frames_ahead`
        // published frames plus the one being prepared can be in flight.
        assert!(
            produced - consumed <= config.max_frames_ahead + 1,
            "update ran {} frames ahead of render (bound {})",
            produced - consumed,
            config.max_frames_ahead
        );
    }

    rig.shutdown();
}

// ============================================================================
// STOP
// ============================================================================

#[test]
fn stop_is_idempotent_and_joins_all_roles() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    start_rig(&rig);

    rig.tick();
    rig.wait_until("a frame", || rig.frames() >= 1);

    rig.sync.stop();
    rig.sync.stop();
    assert_eq!(rig.sync.current_state(), SyncState::Stopped);

    let (sync, vsync_alive) = rig.shutdown();
    assert!(!vsync_alive);
    assert_eq!(sync.current_state(), SyncState::Stopped);
}

#[test]
fn stop_while_initialising_releases_all_roles() {
    let rig = spawn_rig(&PacingConfig::default(), Duration::ZERO);
    // No start(): the update role is parked waiting to leave Initialising.
    thread::sleep(Duration::from_millis(20));

    rig.shutdown();
}
