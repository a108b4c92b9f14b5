//! # Scene Engine Collaborator
//!
//! The scene graph is an external collaborator: the pacing core only needs
//! to step it once per frame and ask whether it wants to keep animating.
//!
//! `update` is called only from the update role and `render` only from the
//! render role. The sync core's ahead-counters guarantee the two are never
//! called concurrently for the same frame, but implementations must still
//! be `Sync` because the calls come from different OS threads.

use crate::surface::RenderSurface;

/// Outcome of one scene update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStatus {
    /// Whether the scene has more to animate. When false for several
    /// consecutive frames the update role tries to go to sleep.
    pub keep_updating: bool,
    /// Whether the event loop should be woken to process notification
    /// messages queued by this update.
    pub needs_notification: bool,
}

/// Outcome of one scene render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStatus {
    /// Whether anything was actually drawn to the surface.
    pub has_rendered: bool,
}

/// The scene graph stepped by the pacing core.
pub trait SceneEngine: Send + Sync {
    /// Advances animations by `delta_seconds` and prepares the next frame.
    ///
    /// `last_sync_time_ms` is the timestamp of the most recent display
    /// sync; `next_sync_time_ms` is the predicted timestamp of the next
    /// one, which animation stepping should target.
    fn update(
        &self,
        delta_seconds: f32,
        last_sync_time_ms: u64,
        next_sync_time_ms: u64,
    ) -> UpdateStatus;

    /// Draws the most recently updated frame onto `surface`.
    fn render(&self, surface: &mut dyn RenderSurface) -> RenderStatus;

    /// Informs the scene that a GPU context now exists.
    fn context_created(&self);

    /// Informs the scene that the GPU context is gone.
    fn context_destroyed(&self);
}
