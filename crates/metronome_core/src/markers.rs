//! # Performance Markers
//!
//! Coarse frame lifecycle timestamps for performance logging. Purely
//! observational: a sink may record, forward or drop markers but can never
//! affect pacing control flow.

/// A coarse frame lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PerformanceMarker {
    /// The update role is about to step the scene.
    UpdateStart,
    /// The update role finished stepping the scene.
    UpdateEnd,
    /// The render role is about to draw.
    RenderStart,
    /// The render role finished drawing.
    RenderEnd,
    /// A valid display sync tick was observed.
    VSync,
    /// The core was paused.
    Paused,
    /// The core was resumed.
    Resume,
}

/// Receives performance markers from the sync core.
pub trait MarkerSink: Send + Sync {
    /// Records a marker. Must be cheap and must not block.
    fn add_marker(&self, marker: PerformanceMarker);
}

/// Sink that logs each marker through `tracing` at trace level.
#[derive(Debug, Default)]
pub struct TracingMarkerSink;

impl MarkerSink for TracingMarkerSink {
    fn add_marker(&self, marker: PerformanceMarker) {
        tracing::trace!(target: "metronome::markers", ?marker);
    }
}
