//! The ambient invocation context of the current thread.
//!
//! Worker threads run action code with an [`InvocationContext`] installed, so
//! that deeply nested helpers can find "their" invocation without it being
//! passed down explicitly:
//!
//! ```ignore
//! fn move_stage(steps: u32) -> Result<(), ActionError> {
//!     let logger = get_invocation_logger();
//!     for step in 0..steps {
//!         logger.info(format!("step {}", step));
//!         cancellable_sleep(Duration::from_millis(100))?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The binding is per thread and is not inherited. Threads spawned from action
//! code either copy the context with [`spawn_with_context`] (sharing
//! cancellation and log) or get a fresh one through [`ContextThread`].

use std::cell::RefCell;
use std::io;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelHook;
use crate::error::{panic_message, ActionError};
use crate::invocation::InvocationId;
use crate::logger::{InvocationLogger, LogBuffer, LogRecord, DEFAULT_LOG_CAPACITY};

thread_local! {
    static CURRENT: RefCell<Option<InvocationContext>> = const { RefCell::new(None) };
}

/// Identity, cancellation hook and logger of one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    id: InvocationId,
    cancel: CancelHook,
    logger: InvocationLogger,
}

impl InvocationContext {
    pub fn new(id: InvocationId, cancel: CancelHook, logger: InvocationLogger) -> Self {
        Self { id, cancel, logger }
    }

    /// A context with a fresh id, hook and log, not tracked by any manager.
    ///
    /// Useful for running action code directly in tests.
    pub fn detached() -> Self {
        let id = InvocationId::new();
        let buffer = Arc::new(LogBuffer::new(DEFAULT_LOG_CAPACITY));
        Self::new(id, CancelHook::new(), InvocationLogger::new(id, buffer))
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn cancel_hook(&self) -> &CancelHook {
        &self.cancel
    }

    pub fn logger(&self) -> &InvocationLogger {
        &self.logger
    }

    /// The context bound to the calling thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .ok()
            .flatten()
    }

    /// Bind this context to the calling thread until the guard is dropped.
    ///
    /// Guards nest; dropping one restores whatever was bound before.
    pub fn enter(&self) -> ContextGuard {
        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        ContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with this context bound.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }
}

/// Restores the previous binding when dropped.
#[must_use = "the context is unbound as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<InvocationContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // The slot is gone if the thread is already tearing down.
        let _ = CURRENT.try_with(|current| current.replace(previous));
    }
}

/// Id of the invocation running on this thread.
pub fn current_invocation_id() -> Result<InvocationId, ActionError> {
    InvocationContext::current()
        .map(|context| context.id)
        .ok_or(ActionError::NoContext)
}

/// Sleep, returning [`ActionError::Cancelled`] early if the current
/// invocation is cancelled.
///
/// This is the check-point long-running action code is expected to use.
/// Outside an invocation it fails with [`ActionError::NoContext`] without
/// sleeping.
pub fn cancellable_sleep(duration: Duration) -> Result<(), ActionError> {
    let context = InvocationContext::current().ok_or(ActionError::NoContext)?;
    context.cancel.sleep(duration)
}

/// Check-point that does not sleep.
pub fn check_cancelled() -> Result<(), ActionError> {
    let context = InvocationContext::current().ok_or(ActionError::NoContext)?;
    context.cancel.check()
}

/// Logger of the current invocation, or a disconnected one outside any.
pub fn get_invocation_logger() -> InvocationLogger {
    InvocationContext::current()
        .map(|context| context.logger)
        .unwrap_or_default()
}

/// Spawn a thread that shares the current thread's context.
///
/// Cancelling the invocation cancels both threads, whichever reaches a
/// check-point first acknowledges it, and their logs interleave.
pub fn spawn_with_context<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let context = InvocationContext::current();
    thread::Builder::new().name(name.into()).spawn(move || match context {
        Some(context) => context.scope(f),
        None => f(),
    })
}

/// A thread running under a freshly minted invocation context.
///
/// Cancelling the spawning invocation does not reach the child by itself; use
/// [`ContextThread::join_and_propagate_cancel`] or call
/// [`ContextThread::cancel`] on the cancellation path.
pub struct ContextThread<T> {
    context: InvocationContext,
    handle: JoinHandle<Result<T, ActionError>>,
}

impl<T: Send + 'static> ContextThread<T> {
    pub fn spawn<F>(f: F) -> io::Result<Self>
    where
        F: FnOnce() -> Result<T, ActionError> + Send + 'static,
    {
        let context = InvocationContext::detached();
        let child = context.clone();
        let handle = thread::Builder::new()
            .name(format!("invocation-{}", context.id.short()))
            .spawn(move || child.scope(f))?;
        Ok(Self { context, handle })
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.context.id
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.context.logger.records()
    }

    /// Request cancellation of the child.
    pub fn cancel(&self) -> bool {
        self.context.cancel.request()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the child. A panic in the child becomes
    /// [`ActionError::Panicked`].
    pub fn join(self) -> Result<T, ActionError> {
        self.handle
            .join()
            .unwrap_or_else(|payload| Err(ActionError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Wait for the child, cancelling it if the calling invocation is
    /// cancelled meanwhile.
    ///
    /// The calling thread's hook is polled every `poll_interval`. If it fires,
    /// the child is cancelled and joined, and [`ActionError::Cancelled`] is
    /// returned regardless of how the child finished.
    pub fn join_and_propagate_cancel(self, poll_interval: Duration) -> Result<T, ActionError> {
        let parent = InvocationContext::current();
        let mut cancelled = false;
        while !self.handle.is_finished() {
            match &parent {
                Some(parent) if !cancelled => {
                    if parent.cancel.sleep(poll_interval).is_err() {
                        self.cancel();
                        cancelled = true;
                    }
                }
                _ => thread::sleep(poll_interval),
            }
        }
        let result = self.join();
        if cancelled {
            return Err(ActionError::Cancelled);
        }
        result
    }
}

/// Run `f` with `context` bound, turning a panic into
/// [`ActionError::Panicked`].
pub(crate) fn run_in_context<T>(
    context: &InvocationContext,
    f: impl FnOnce() -> Result<T, ActionError>,
) -> Result<T, ActionError> {
    let _guard = context.enter();
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ActionError::Panicked(panic_message(payload.as_ref()))))
}
