//! # METRONOME Sync
//!
//! The synchronization cores that keep scene updates and GPU rendering in
//! lock-step with the display refresh signal.
//!
//! ## Architecture
//!
//! ```text
//!  event thread          update thread        render thread       vsync thread
//!      │                      │                    │                   │
//!      │ initialise/start     │ update_ready       │ render_ready      │ vsync_ready
//!      ▼                      ▼                    ▼                   ▼
//!  ┌──────────────────────────────────────────────────────────────────────┐
//!  │                        Synchronization Core                          │
//!  │   state machine ∙ ahead counters ∙ startup barrier ∙ rendezvous      │
//!  │        one monitor (mutex + condvar) per waiting thread              │
//!  └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two cores implement the same protocol at two design points:
//!
//! - [`ThreadSynchronization`]: independent update, render and vsync
//!   threads with a bounded update-ahead-of-render pipeline.
//! - [`CombinedSynchronization`]: update and render on one thread, paced
//!   by a vsync thread; simpler handshake, single ahead counter.
//!
//! Every `*_ready` entry point may block its caller; it is the only
//! sanctioned blocking point per worker loop iteration. Waits are level
//! triggered: each one re-checks its predicate in a loop, so a missed wake
//! is recovered on the next call into any entry point.

pub mod combined;
pub mod frame_time;
pub mod monitor;
pub mod state;
pub mod three_thread;

pub use combined::{CombinedPass, CombinedSynchronization};
pub use frame_time::{FrameTick, FrameTime};
pub use monitor::Monitor;
pub use state::SyncState;
pub use three_thread::{RenderDirective, ThreadSynchronization};
