//! # Worker Thread Entry Loops
//!
//! Each loop calls its core entry point once per iteration; the core
//! blocks the caller exactly when the protocol requires waiting and
//! returns whether the loop should continue. Collaborator work (scene
//! stepping, GPU presents, vsync waits) happens outside the core.

use crate::vsync::VsyncSource;
use metronome_core::scene::{SceneEngine, UpdateStatus};
use metronome_core::surface::RenderSurface;
use metronome_core::time::TimeSource;
use metronome_sync::{CombinedSynchronization, RenderDirective, ThreadSynchronization};
use std::sync::Arc;
use tracing::{debug, info};

/// Frames-per-second bookkeeping for the update loop, logged through
/// `tracing` every `interval_seconds`. Disabled when the interval is 0.
struct FpsTracker {
    interval_seconds: f32,
    elapsed_seconds: f32,
    frames: u32,
}

impl FpsTracker {
    fn new(interval_seconds: u32) -> Self {
        Self {
            interval_seconds: interval_seconds as f32,
            elapsed_seconds: 0.0,
            frames: 0,
        }
    }

    fn record_frame(&mut self, delta_seconds: f32) {
        if self.interval_seconds <= 0.0 {
            return;
        }
        self.elapsed_seconds += delta_seconds;
        self.frames += 1;
        if self.elapsed_seconds >= self.interval_seconds {
            let fps = self.frames as f32 / self.elapsed_seconds;
            info!(target: "metronome::fps", fps, frames = self.frames);
            self.elapsed_seconds = 0.0;
            self.frames = 0;
        }
    }
}

/// The update thread: steps the scene once per released frame.
pub(crate) fn run_update_loop(
    sync: Arc<ThreadSynchronization>,
    scene: Arc<dyn SceneEngine>,
    fps_tracking_seconds: u32,
) {
    debug!(target: "metronome::threads", "update loop starting");

    let mut status = UpdateStatus {
        keep_updating: true,
        needs_notification: false,
    };
    let mut fps = FpsTracker::new(fps_tracking_seconds);

    while let Some(tick) = sync.update_ready(status.needs_notification, status.keep_updating) {
        status = scene.update(
            tick.delta_seconds,
            tick.last_sync_time_ms,
            tick.next_sync_time_ms,
        );
        fps.record_frame(tick.delta_seconds);
    }

    debug!(target: "metronome::threads", "update loop exiting");
}

/// The render thread: draws prepared frames and services surface
/// replacements.
pub(crate) fn run_render_loop(
    sync: Arc<ThreadSynchronization>,
    scene: Arc<dyn SceneEngine>,
    mut surface: Box<dyn RenderSurface>,
    clock: Arc<dyn TimeSource>,
) {
    debug!(target: "metronome::threads", "render loop starting");

    scene.context_created();
    surface.start_render();
    let mut last_present_micros = clock.now_micros();

    loop {
        match sync.render_ready() {
            RenderDirective::Render => {
                if surface.pre_render() {
                    let _status = scene.render(surface.as_mut());
                    let now = clock.now_micros();
                    surface.post_render(now.saturating_sub(last_present_micros));
                    last_present_micros = now;
                }
            }
            RenderDirective::ReplaceSurface(new_surface) => {
                debug!(target: "metronome::threads", "render loop replacing surface");
                surface.stop_render();
                surface = new_surface;
                surface.start_render();
                sync.render_informs_surface_replaced();
            }
            RenderDirective::Stop => break,
        }
    }

    surface.stop_render();
    scene.context_destroyed();
    debug!(target: "metronome::threads", "render loop exiting");
}

/// The vsync thread: banks ticks into the core. The frame number only
/// advances on valid ticks.
pub(crate) fn run_vsync_loop(
    sync: Arc<ThreadSynchronization>,
    mut source: Box<dyn VsyncSource>,
    initial_vsyncs_per_render: u32,
) {
    debug!(
        target: "metronome::threads",
        hardware = source.use_hardware(),
        "vsync loop starting"
    );

    let mut vsyncs_per_render = initial_vsyncs_per_render;
    let mut frame_number = 0;
    loop {
        let keep_running = match source.wait_for_tick() {
            Some(tick) => {
                frame_number += 1;
                sync.vsync_ready(
                    true,
                    frame_number,
                    tick.seconds,
                    tick.microseconds,
                    &mut vsyncs_per_render,
                )
            }
            None => sync.vsync_ready(false, frame_number, 0, 0, &mut vsyncs_per_render),
        };
        if !keep_running {
            break;
        }
    }

    source.terminate();
    debug!(target: "metronome::threads", "vsync loop exiting");
}

/// Variant of [`run_vsync_loop`] for the combined core.
pub(crate) fn run_combined_vsync_loop(
    sync: Arc<CombinedSynchronization>,
    mut source: Box<dyn VsyncSource>,
    initial_vsyncs_per_render: u32,
) {
    let mut vsyncs_per_render = initial_vsyncs_per_render;
    let mut frame_number = 0;
    loop {
        let keep_running = match source.wait_for_tick() {
            Some(tick) => {
                frame_number += 1;
                sync.vsync_ready(
                    true,
                    frame_number,
                    tick.seconds,
                    tick.microseconds,
                    &mut vsyncs_per_render,
                )
            }
            None => sync.vsync_ready(false, frame_number, 0, 0, &mut vsyncs_per_render),
        };
        if !keep_running {
            break;
        }
    }
    source.terminate();
}

/// The combined update/render thread: one iteration steps and then draws,
/// or swaps the surface when a replacement is pending.
pub(crate) fn run_combined_loop(
    sync: Arc<CombinedSynchronization>,
    scene: Arc<dyn SceneEngine>,
    mut surface: Box<dyn RenderSurface>,
    clock: Arc<dyn TimeSource>,
    fps_tracking_seconds: u32,
) {
    debug!(target: "metronome::threads", "combined loop starting");

    scene.context_created();
    surface.start_render();

    let mut status = UpdateStatus {
        keep_updating: true,
        needs_notification: false,
    };
    let mut fps = FpsTracker::new(fps_tracking_seconds);
    let mut last_present_micros = clock.now_micros();

    while let Some(pass) = sync.update_render_ready(status.needs_notification, status.keep_updating)
    {
        if let Some(new_surface) = pass.new_surface {
            debug!(target: "metronome::threads", "combined loop replacing surface");
            surface.stop_render();
            surface = new_surface;
            surface.start_render();
            sync.surface_replaced();
            continue;
        }

        status = scene.update(
            pass.tick.delta_seconds,
            pass.tick.last_sync_time_ms,
            pass.tick.next_sync_time_ms,
        );

        if surface.pre_render() {
            let _render_status = scene.render(surface.as_mut());
            let now = clock.now_micros();
            surface.post_render(now.saturating_sub(last_present_micros));
            last_present_micros = now;
        }

        fps.record_frame(pass.tick.delta_seconds);
    }

    surface.stop_render();
    scene.context_destroyed();
    debug!(target: "metronome::threads", "combined loop exiting");
}
