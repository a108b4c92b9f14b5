//! # METRONOME Core
//!
//! Shared leaf types for the METRONOME frame-pacing stack.
//!
//! The synchronization cores in `metronome_sync` coordinate three kinds of
//! collaborators, all of which are modeled here as traits so the pacing
//! protocol never depends on a concrete GPU, windowing system or scene
//! graph:
//!
//! - [`SceneEngine`]: the scene graph that is updated and rendered once per
//!   frame.
//! - [`RenderSurface`]: the opaque render target, owned by the render role
//!   except during a replacement rendezvous.
//! - [`NotificationTrigger`]: a one-way wake of the event loop.
//! - [`MarkerSink`]: an observational sink for coarse frame timestamps.
//!
//! Also home to [`PacingConfig`] (loaded once at startup) and the
//! [`TimeSource`] abstraction that keeps frame-time prediction
//! deterministic under test.

pub mod config;
pub mod error;
pub mod markers;
pub mod scene;
pub mod surface;
pub mod time;
pub mod trigger;

pub use config::PacingConfig;
pub use error::{ConfigError, CoreResult};
pub use markers::{MarkerSink, PerformanceMarker, TracingMarkerSink};
pub use scene::{RenderStatus, SceneEngine, UpdateStatus};
pub use surface::RenderSurface;
pub use time::{ManualClock, MonotonicClock, TimeSource};
pub use trigger::{ChannelTrigger, NotificationTrigger};
