//! # Combined Two-Thread Protocol Verification
//!
//! Drives the real `CombinedSynchronization` core with a combined
//! update/render thread and a scripted vsync thread, covering the startup
//! barrier, lock-step pacing, pause/resume, idle sleep, slot-based surface
//! replacement and the post-render handshake.
//!
//! Run with: cargo test --test combined_protocol

use crossbeam_channel::{unbounded, Sender};
use metronome_core::surface::RenderSurface;
use metronome_core::time::ManualClock;
use metronome_core::trigger::ChannelTrigger;
use metronome_core::{PacingConfig, TimeSource};
use metronome_sync::{CombinedSynchronization, SyncState};
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

struct Rig {
    sync: Arc<CombinedSynchronization>,
    clock: Arc<ManualClock>,
    tick_tx: Sender<()>,
    frames: Arc<AtomicU32>,
    replaced: Arc<AtomicU32>,
    run_update: Arc<AtomicBool>,
    combined_thread: JoinHandle<()>,
    vsync_thread: JoinHandle<bool>,
}

fn spawn_rig(config: &PacingConfig) -> Rig {
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let (trigger, _notifications) = ChannelTrigger::new();
    let sync = Arc::new(CombinedSynchronization::new(
        config,
        Arc::clone(&clock) as Arc<dyn TimeSource>,
        Arc::new(trigger),
        None,
    ));

    let frames = Arc::new(AtomicU32::new(0));
    let replaced = Arc::new(AtomicU32::new(0));
    let run_update = Arc::new(AtomicBool::new(true));
    let (tick_tx, tick_rx) = unbounded::<()>();

    sync.initialise();

    let combined_thread = {
        let sync = Arc::clone(&sync);
        let frames = Arc::clone(&frames);
        let replaced = Arc::clone(&replaced);
        let run_update = Arc::clone(&run_update);
        thread::spawn(move || {
            while let Some(pass) =
                sync.update_render_ready(false, run_update.load(Ordering::SeqCst))
            {
                if let Some(_surface) = pass.new_surface {
                    // Swap instead of rendering this iteration.
                    replaced.fetch_add(1, Ordering::SeqCst);
                    sync.surface_replaced();
                    continue;
                }
                frames.fetch_add(1, Ordering::SeqCst);
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
        replaced,
        run_update,
        combined_thread,
        vsync_thread,
    }
}

impl Rig {
    fn tick(&self) {
        self.clock.advance(INTERVAL);
        self.tick_tx.send(()).expect("vsync role gone");
    }

    fn frames(&self) -> u32 {
        self.frames.load(Ordering::SeqCst)
    }

    fn wait_until(&self, what: &str, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn shutdown(self) -> Arc<CombinedSynchronization> {
        self.sync.stop();
        self.combined_thread.join().expect("combined role panicked");
        let _ = self.tick_tx.send(());
        self.vsync_thread.join().expect("vsync role panicked");
        self.sync
    }
}

fn start_rig(rig: &Rig) {
    rig.tick();
    rig.sync.start();
    assert_eq!(rig.sync.current_state(), SyncState::Running);
}

#[test]
fn start_blocks_until_both_roles_are_alive() {
    let rig = spawn_rig(&PacingConfig::default());

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
    assert!(!started.load(Ordering::SeqCst));

    rig.tick();
    starter.join().unwrap();
    assert_eq!(rig.sync.current_state(), SyncState::Running);

    rig.shutdown();
}

#[test]
fn frames_advance_with_ticks() {
    let rig = spawn_rig(&PacingConfig::default());
    start_rig(&rig);

    rig.wait_until("first frame", || rig.frames() >= 1);
    rig.tick();
    rig.wait_until("second frame", || rig.frames() >= 2);

    let sync = rig.shutdown();
    assert!(sync.update_render_ready(false, true).is_none());
    let mut vsyncs_per_render = 1;
    assert!(!sync.vsync_ready(true, 99, 0, 0, &mut vsyncs_per_render));
}

#[test]
fn resume_produces_exactly_one_frame_without_a_fresh_tick() {
    let rig = spawn_rig(&PacingConfig::default());
    start_rig(&rig);

    rig.tick();
    rig.wait_until("frames before pause", || rig.frames() >= 2);

    rig.sync.pause();
    thread::sleep(Duration::from_millis(30));
    let frames_at_pause = rig.frames();

    rig.sync.resume();
    rig.wait_until("the resume frame", || rig.frames() == frames_at_pause + 1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(rig.frames(), frames_at_pause + 1);

    rig.shutdown();
}

#[test]
fn three_idle_frames_enter_sleep_and_update_request_wakes() {
    let rig = spawn_rig(&PacingConfig::default());
    rig.run_update.store(false, Ordering::SeqCst);
    start_rig(&rig);

    let deadline = Instant::now() + Duration::from_secs(2);
    while rig.sync.current_state() != SyncState::Sleeping {
        assert!(Instant::now() < deadline, "core never went to sleep");
        rig.tick();
        thread::sleep(Duration::from_millis(2));
    }

    let frames_at_sleep = rig.frames();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(rig.frames(), frames_at_sleep);

    rig.run_update.store(true, Ordering::SeqCst);
    rig.sync.update_request();
    rig.wait_until("wake from sleep", || {
        rig.sync.current_state() == SyncState::Running
    });
    rig.wait_until("post-wake frame", || rig.frames() > frames_at_sleep);

    rig.shutdown();
}

#[test]
fn surface_slot_is_drained_exactly_once_while_running() {
    let rig = spawn_rig(&PacingConfig::default());
    start_rig(&rig);

    rig.tick();
    rig.wait_until("steady state", || rig.frames() >= 2);

    assert!(rig.sync.replace_surface(Box::new(TestSurface)));
    assert_eq!(rig.replaced.load(Ordering::SeqCst), 1);
    assert_eq!(rig.sync.current_state(), SyncState::Running);

    // The slot replacement consumes an iteration instead of a frame;
    // pacing continues afterwards.
    let frames_after = rig.frames();
    rig.tick();
    rig.wait_until("frame after replace", || rig.frames() > frames_after);

    rig.shutdown();
}

#[test]
fn surface_replacement_wakes_a_sleeping_core() {
    let rig = spawn_rig(&PacingConfig::default());
    rig.run_update.store(false, Ordering::SeqCst);
    start_rig(&rig);

    let deadline = Instant::now() + Duration::from_secs(2);
    while rig.sync.current_state() != SyncState::Sleeping {
        assert!(Instant::now() < deadline, "core never went to sleep");
        rig.tick();
        thread::sleep(Duration::from_millis(2));
    }

    assert!(rig.sync.replace_surface(Box::new(TestSurface)));
    assert_eq!(rig.replaced.load(Ordering::SeqCst), 1);

    rig.shutdown();
}

#[test]
fn replace_surface_rejected_when_stopped() {
    let clock = Arc::new(ManualClock::default());
    let (trigger, _notifications) = ChannelTrigger::new();
    let sync = CombinedSynchronization::new(
        &PacingConfig::default(),
        clock as Arc<dyn TimeSource>,
        Arc::new(trigger),
        None,
    );
    assert!(!sync.replace_surface(Box::new(TestSurface)));
}

#[test]
fn post_render_hold_is_released_by_the_event_thread() {
    let clock = Arc::new(ManualClock::default());
    let (trigger, _notifications) = ChannelTrigger::new();
    let sync = Arc::new(CombinedSynchronization::new(
        &PacingConfig::default(),
        clock as Arc<dyn TimeSource>,
        Arc::new(trigger),
        None,
    ));
    sync.initialise();

    sync.post_render_started();
    let held = Arc::new(AtomicBool::new(true));
    let holder = {
        let sync = Arc::clone(&sync);
        let held = Arc::clone(&held);
        thread::spawn(move || {
            sync.post_render_wait_for_completion();
            held.store(false, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(held.load(Ordering::SeqCst), "hold released prematurely");

    sync.post_render_complete();
    holder.join().unwrap();
    assert!(!held.load(Ordering::SeqCst));
}

#[test]
fn post_render_hold_is_released_by_a_stop() {
    let clock = Arc::new(ManualClock::default());
    let (trigger, _notifications) = ChannelTrigger::new();
    let sync = Arc::new(CombinedSynchronization::new(
        &PacingConfig::default(),
        clock as Arc<dyn TimeSource>,
        Arc::new(trigger),
        None,
    ));
    sync.initialise();

    sync.post_render_started();
    let holder = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || sync.post_render_wait_for_completion())
    };

    thread::sleep(Duration::from_millis(20));
    sync.stop();
    holder.join().unwrap();
}
