//! # Per-Thread Monitor
//!
//! A mutex/condvar pair guarding one small struct of shared fields. The
//! cores own one monitor per waiting thread (update, render, vsync,
//! event) instead of a single global lock, so the latency-sensitive vsync
//! thread never contends with heavy update/render critical sections.
//!
//! Waiters must re-check their predicate in a loop; notifiers mutate the
//! guarded fields under the lock before notifying, so a waiter either
//! observes the new value or is already parked and receives the wake.

use parking_lot::{Condvar, Mutex, MutexGuard};

/// A mutex-guarded value with an attached condition variable.
pub struct Monitor<T> {
    state: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a monitor around an initial value.
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Locks the guarded value.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Releases the guard's lock and parks until notified, re-acquiring
    /// the lock before returning. Callers wrap this in a predicate loop.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Wakes every thread parked on this monitor.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").field("state", &self.state).finish()
    }
}
