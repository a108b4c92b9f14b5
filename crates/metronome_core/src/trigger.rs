//! # Event-Loop Notification Trigger
//!
//! A one-way wake of the event thread, fired by the update role when a
//! scene update queued notification messages. The wake is level-style:
//! triggering twice before the event loop drains is the same as triggering
//! once.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// One-way wake of the event loop.
pub trait NotificationTrigger: Send + Sync {
    /// Requests that the event loop wake up and process pending
    /// notifications. Must not block.
    fn trigger(&self);
}

/// Trigger backed by a bounded(1) channel; repeated triggers coalesce
/// until the event loop drains the wake.
pub struct ChannelTrigger {
    sender: Sender<()>,
}

impl ChannelTrigger {
    /// Creates a trigger and the receiving end the event loop selects on.
    #[must_use]
    pub fn new() -> (Self, Receiver<()>) {
        let (sender, receiver) = bounded(1);
        (Self { sender }, receiver)
    }
}

impl NotificationTrigger for ChannelTrigger {
    fn trigger(&self) {
        match self.sender.try_send(()) {
            // A wake is already queued; coalesce.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("notification trigger fired after event loop shutdown");
            }
        }
    }
}
