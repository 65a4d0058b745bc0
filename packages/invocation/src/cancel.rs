//! Cooperative cancellation.
//!
//! Each invocation owns one [`CancelHook`]. Any thread may request
//! cancellation; only the worker thread observes it, at a check-point
//! ([`CancelHook::sleep`] or [`CancelHook::check`]). Code that never reaches a
//! check-point runs to completion regardless of requests.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Where a hook is in its request/acknowledge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelState {
    #[default]
    NotRequested,
    Requested,
    /// A check-point observed the request and raised [`ActionError::Cancelled`].
    Acknowledged,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<CancelState>,
    changed: Condvar,
}

/// A shareable cancellation flag.
///
/// Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHook {
    inner: Arc<Inner>,
}

impl CancelHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop at its next check-point.
    ///
    /// Returns `false` if a request was already pending. A request made after
    /// an earlier one was acknowledged arms the hook again.
    pub fn request(&self) -> bool {
        let mut state = self.lock();
        if *state == CancelState::Requested {
            return false;
        }
        *state = CancelState::Requested;
        self.inner.changed.notify_all();
        true
    }

    pub fn state(&self) -> CancelState {
        *self.lock()
    }

    pub fn is_requested(&self) -> bool {
        self.state() == CancelState::Requested
    }

    /// Check-point without waiting.
    pub fn check(&self) -> Result<(), ActionError> {
        let mut state = self.lock();
        Self::acknowledge(&mut state)
    }

    /// Sleep for `duration`, waking early with [`ActionError::Cancelled`] if
    /// cancellation is (or already was) requested.
    pub fn sleep(&self, duration: Duration) -> Result<(), ActionError> {
        let deadline = Instant::now() + duration;
        let mut state = self.lock();
        loop {
            Self::acknowledge(&mut state)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (guard, _) = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Whether two hooks share the same flag.
    pub fn same_as(&self, other: &CancelHook) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn acknowledge(state: &mut CancelState) -> Result<(), ActionError> {
        if *state == CancelState::Requested {
            *state = CancelState::Acknowledged;
            return Err(ActionError::Cancelled);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
