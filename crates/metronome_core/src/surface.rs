//! # Render Surface Collaborator
//!
//! The render target is opaque to the pacing core. It is owned exclusively
//! by the render role, except during a replacement rendezvous when
//! ownership of the new surface transfers through the sync core under its
//! lock.

/// An opaque render target driven by the render role.
///
/// All methods are invoked only from the render thread.
pub trait RenderSurface: Send {
    /// Called once when the render role takes ownership of the surface.
    fn start_render(&mut self);

    /// Prepares the surface for drawing. Returning false skips this
    /// frame's render (e.g. the surface is temporarily unavailable).
    fn pre_render(&mut self) -> bool;

    /// Presents the frame. `frame_delta_micros` is the time spent since
    /// the previous present, for surfaces that throttle internally.
    fn post_render(&mut self, frame_delta_micros: u64);

    /// Called when the render role releases the surface, either at
    /// shutdown or just before replacement.
    fn stop_render(&mut self);
}
