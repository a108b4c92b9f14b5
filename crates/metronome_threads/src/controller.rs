//! # Controllers
//!
//! A controller owns a synchronization core and its worker threads, and
//! exposes the event-thread lifecycle API. Creating a controller spawns
//! the workers, which park on the startup barrier; `start()` releases
//! them. `stop()` terminates and joins every worker, after which the
//! controller can be recreated.

use crate::loops;
use crate::vsync::VsyncSource;
use metronome_core::markers::MarkerSink;
use metronome_core::scene::SceneEngine;
use metronome_core::surface::RenderSurface;
use metronome_core::time::{MonotonicClock, TimeSource};
use metronome_core::trigger::NotificationTrigger;
use metronome_core::PacingConfig;
use metronome_sync::{CombinedSynchronization, SyncState, ThreadSynchronization};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// The external collaborators a controller wires into its worker loops.
pub struct Collaborators {
    /// Scene graph stepped by the update role and drawn by the render
    /// role.
    pub scene: Arc<dyn SceneEngine>,
    /// Initial render target, owned by the render role.
    pub surface: Box<dyn RenderSurface>,
    /// Tick source driven by the vsync role.
    pub vsync_source: Box<dyn VsyncSource>,
    /// One-way wake of the event loop.
    pub trigger: Arc<dyn NotificationTrigger>,
    /// Optional performance-marker sink.
    pub markers: Option<Arc<dyn MarkerSink>>,
    /// Clock shared by the predictor and the render loop's present
    /// bookkeeping. Defaults to [`MonotonicClock`] via
    /// [`Collaborators::default_clock`].
    pub clock: Arc<dyn TimeSource>,
}

impl Collaborators {
    /// The clock used when an embedder has no reason to supply one.
    #[must_use]
    pub fn default_clock() -> Arc<dyn TimeSource> {
        Arc::new(MonotonicClock::new())
    }
}

/// Controller for the three-thread design: independent update, render and
/// vsync threads.
pub struct ThreadedController {
    sync: Arc<ThreadSynchronization>,
    update_thread: Option<JoinHandle<()>>,
    render_thread: Option<JoinHandle<()>>,
    vsync_thread: Option<JoinHandle<()>>,
}

impl ThreadedController {
    /// Creates the core and spawns the three worker threads. The workers
    /// park on the startup barrier until [`start`](Self::start).
    #[must_use]
    pub fn new(config: &PacingConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            scene,
            surface,
            vsync_source,
            trigger,
            markers,
            clock,
        } = collaborators;

        let sync = Arc::new(ThreadSynchronization::new(
            config,
            Arc::clone(&clock),
            trigger,
            markers,
        ));
        sync.initialise();

        let update_thread = {
            let sync = Arc::clone(&sync);
            let scene = Arc::clone(&scene);
            let fps = config.fps_tracking_seconds;
            thread::spawn(move || loops::run_update_loop(sync, scene, fps))
        };

        let render_thread = {
            let sync = Arc::clone(&sync);
            let scene = Arc::clone(&scene);
            let clock = Arc::clone(&clock);
            thread::spawn(move || loops::run_render_loop(sync, scene, surface, clock))
        };

        let vsync_thread = {
            let sync = Arc::clone(&sync);
            let vsyncs_per_render = config.vsyncs_per_render;
            thread::spawn(move || loops::run_vsync_loop(sync, vsync_source, vsyncs_per_render))
        };

        info!(target: "metronome::threads", "threaded controller created");
        Self {
            sync,
            update_thread: Some(update_thread),
            render_thread: Some(render_thread),
            vsync_thread: Some(vsync_thread),
        }
    }

    /// Releases the workers into `Running`; blocks until all three are
    /// alive.
    pub fn start(&self) {
        self.sync.start();
        info!(target: "metronome::threads", "threaded controller started");
    }

    /// Pauses frame production.
    pub fn pause(&self) {
        self.sync.pause();
    }

    /// Resumes frame production with the one-frame fast path.
    pub fn resume(&self) {
        self.sync.resume();
    }

    /// Wakes a sleeping core because scene messages were queued.
    pub fn update_request(&self) {
        self.sync.update_request();
    }

    /// Forces one extra frame regardless of state.
    pub fn update_once(&self) {
        self.sync.update_once();
    }

    /// Swaps the render target; blocks until the render thread has
    /// serviced the replacement.
    pub fn replace_surface(&self, new_surface: Box<dyn RenderSurface>) -> bool {
        self.sync.replace_surface(new_surface)
    }

    /// Changes the vsync-per-render divisor at runtime.
    pub fn set_render_refresh_rate(&self, vsyncs_per_render: u32) {
        self.sync.set_render_refresh_rate(vsyncs_per_render);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.sync.current_state()
    }

    /// Stops the core and joins all worker threads. Idempotent.
    pub fn stop(&mut self) {
        self.sync.stop();
        for handle in [
            self.update_thread.take(),
            self.render_thread.take(),
            self.vsync_thread.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        info!(target: "metronome::threads", "threaded controller stopped");
    }
}

impl Drop for ThreadedController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ThreadedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedController")
            .field("state", &self.sync.current_state())
            .finish()
    }
}

/// Controller for the two-thread design: a combined update/render thread
/// paced by a vsync thread.
pub struct CombinedController {
    sync: Arc<CombinedSynchronization>,
    combined_thread: Option<JoinHandle<()>>,
    vsync_thread: Option<JoinHandle<()>>,
}

impl CombinedController {
    /// Creates the core and spawns the two worker threads.
    #[must_use]
    pub fn new(config: &PacingConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            scene,
            surface,
            vsync_source,
            trigger,
            markers,
            clock,
        } = collaborators;

        let sync = Arc::new(CombinedSynchronization::new(
            config,
            Arc::clone(&clock),
            trigger,
            markers,
        ));
        sync.initialise();

        let combined_thread = {
            let sync = Arc::clone(&sync);
            let scene = Arc::clone(&scene);
            let clock = Arc::clone(&clock);
            let fps = config.fps_tracking_seconds;
            thread::spawn(move || loops::run_combined_loop(sync, scene, surface, clock, fps))
        };

        let vsync_thread = {
            let sync = Arc::clone(&sync);
            let vsyncs_per_render = config.vsyncs_per_render;
            thread::spawn(move || {
                loops::run_combined_vsync_loop(sync, vsync_source, vsyncs_per_render);
            })
        };

        info!(target: "metronome::threads", "combined controller created");
        Self {
            sync,
            combined_thread: Some(combined_thread),
            vsync_thread: Some(vsync_thread),
        }
    }

    /// Releases the workers into `Running`; blocks until both are alive.
    pub fn start(&self) {
        self.sync.start();
        info!(target: "metronome::threads", "combined controller started");
    }

    /// Pauses frame production.
    pub fn pause(&self) {
        self.sync.pause();
    }

    /// Resumes frame production with the one-frame fast path.
    pub fn resume(&self) {
        self.sync.resume();
    }

    /// Wakes a sleeping core because scene messages were queued.
    pub fn update_request(&self) {
        self.sync.update_request();
    }

    /// Forces one extra frame regardless of state.
    pub fn update_once(&self) {
        self.sync.update_once();
    }

    /// Deposits a new render target; blocks until the combined thread has
    /// swapped to it.
    pub fn replace_surface(&self, new_surface: Box<dyn RenderSurface>) -> bool {
        self.sync.replace_surface(new_surface)
    }

    /// Changes the vsync-per-render divisor at runtime.
    pub fn set_render_refresh_rate(&self, vsyncs_per_render: u32) {
        self.sync.set_render_refresh_rate(vsyncs_per_render);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.sync.current_state()
    }

    /// Stops the core and joins both worker threads. Idempotent.
    pub fn stop(&mut self) {
        self.sync.stop();
        for handle in [self.combined_thread.take(), self.vsync_thread.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.join();
        }
        info!(target: "metronome::threads", "combined controller stopped");
    }
}

impl Drop for CombinedController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CombinedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedController")
            .field("state", &self.sync.current_state())
            .finish()
    }
}
