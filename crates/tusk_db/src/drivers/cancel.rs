//! Tracks the statement currently in flight on a driver.
//!
//! A driver arms the controller with an engine token (a backend pid, an
//! interrupt handle) right before a statement starts and disarms it when the
//! statement finishes. `cancel` reads the token under the same lock, so it
//! always sees the statement that is running now.
//!
//! The guard returned by [`CancellationController::arm`] owns a handle to the
//! controller and travels with the worker that runs the statement. A caller
//! that stops waiting (a timeout dropping the `execute` future) leaves the
//! token in place until the engine is actually done.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The statement currently registered for cancellation.
#[derive(Debug, Clone)]
pub struct ActiveStatement<T> {
    /// Monotonic statement number
    pub id: u64,
    /// Engine-specific cancellation token
    pub token: T,
}

/// Holds at most one cancellation token.
pub struct CancellationController<T> {
    active: Mutex<Option<ActiveStatement<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> CancellationController<T> {
    /// Create a controller with nothing in flight.
    pub fn new() -> Self {
        Self { active: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    /// Register `token` for the statement about to start, replacing any
    /// previous one. Disarms when the returned guard drops.
    pub fn arm(self: &Arc<Self>, token: T) -> ArmedStatement<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.active.lock() = Some(ActiveStatement { id, token });
        tracing::trace!(statement_id = id, "Cancellation token armed");
        ArmedStatement { controller: Arc::clone(self), id }
    }

    /// Remove the token, but only if it still belongs to statement `id`.
    pub fn clear(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    /// Remove whatever token is registered.
    pub fn reset(&self) {
        *self.active.lock() = None;
    }

    /// Snapshot of the registered statement.
    pub fn current(&self) -> Option<ActiveStatement<T>> {
        self.active.lock().clone()
    }

    /// Whether a statement is registered.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl<T: Clone> Default for CancellationController<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears its statement's token on drop.
pub struct ArmedStatement<T: Clone> {
    controller: Arc<CancellationController<T>>,
    id: u64,
}

impl<T: Clone> ArmedStatement<T> {
    /// Statement number assigned when armed.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T: Clone> Drop for ArmedStatement<T> {
    fn drop(&mut self) {
        self.controller.clear(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_clears_on_drop() {
        let controller = Arc::new(CancellationController::new());
        {
            let _armed = controller.arm(42_i32);
            assert_eq!(controller.current().map(|a| a.token), Some(42));
        }
        assert!(!controller.is_active());
    }

    #[test]
    fn test_new_statement_overwrites_and_stale_clear_is_ignored() {
        let controller = Arc::new(CancellationController::new());
        let first = controller.arm(1_i32);
        let first_id = first.id();
        std::mem::forget(first);

        let second = controller.arm(2_i32);
        controller.clear(first_id);
        assert_eq!(controller.current().map(|a| a.token), Some(2));

        drop(second);
        assert!(controller.current().is_none());
    }

    #[test]
    fn test_reset() {
        let controller = Arc::new(CancellationController::new());
        let armed = controller.arm("pid");
        controller.reset();
        assert!(!controller.is_active());
        drop(armed);
    }

    #[test]
    fn test_guard_outlives_the_caller_that_armed_it() {
        let controller = Arc::new(CancellationController::new());
        let armed = controller.arm(7_i32);

        let (release, wait) = std::sync::mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _armed = armed;
            let _ = wait.recv();
        });

        assert_eq!(controller.current().map(|a| a.token), Some(7));
        release.send(()).unwrap();
        worker.join().unwrap();
        assert!(!controller.is_active());
    }
}
