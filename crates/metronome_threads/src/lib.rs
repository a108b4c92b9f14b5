//! # METRONOME Threads
//!
//! The worker-thread layer: vsync source adapters, the thread entry loops
//! that drive a synchronization core, and the controllers that own the
//! whole arrangement.
//!
//! ```text
//! ┌────────────────────────── event thread ──────────────────────────┐
//! │            ThreadedController / CombinedController               │
//! │   initialise ∙ start ∙ pause ∙ resume ∙ stop ∙ replace_surface   │
//! └──────────────┬──────────────────┬──────────────────┬─────────────┘
//!                ▼                  ▼                  ▼
//!          update loop         render loop        vsync loop
//!        SceneEngine::update  SceneEngine::render  VsyncSource
//! ```
//!
//! Worker loops block only inside their core entry point; collaborator
//! calls (scene update/render, surface present, vsync wait) happen
//! outside the core's locks.

pub mod controller;
pub mod loops;
pub mod vsync;

pub use controller::{Collaborators, CombinedController, ThreadedController};
pub use vsync::{SoftwareTimer, VsyncSource, VsyncTick};
