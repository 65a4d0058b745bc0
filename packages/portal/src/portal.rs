//! Submitting async work from blocking threads.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, ThreadId};

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{PortalError, Result};

/// Lets a blocking thread run a future on an [`EventLoop`](crate::EventLoop)
/// and wait for its output.
///
/// A portal belongs to one event loop and is handed explicitly to the code
/// that needs it; there is no global portal. Two servers in one process
/// therefore never submit work to each other's loop.
///
/// ```ignore
/// let frame = portal.run(async move { camera_stream.next_frame().await })?;
/// ```
#[derive(Debug, Clone)]
pub struct BlockingPortal {
    handle: Handle,
    closed: Arc<AtomicBool>,
    loop_thread: ThreadId,
}

impl BlockingPortal {
    pub(crate) fn new(handle: Handle, closed: Arc<AtomicBool>, loop_thread: ThreadId) -> Self {
        Self {
            handle,
            closed,
            loop_thread,
        }
    }

    /// Run `future` on the event loop and block until it finishes.
    ///
    /// Meant for plain threads, such as an invocation's worker. Calling it on
    /// the loop's own thread returns [`PortalError::OnEventLoop`] instead of
    /// deadlocking. A panic in the future is returned as
    /// [`PortalError::Panicked`].
    pub fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if thread::current().id() == self.loop_thread {
            return Err(PortalError::OnEventLoop);
        }
        if self.is_closed() {
            return Err(PortalError::Closed);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let task = self.handle.spawn(future);
        self.handle.spawn(async move {
            let _ = tx.send(task.await);
        });
        // The sender is dropped unsent if the loop shuts down first.
        match rx.recv() {
            Ok(result) => result.map_err(from_join_error),
            Err(_) => Err(PortalError::Closed),
        }
    }

    /// Like [`run`](Self::run) for fallible futures, folding portal errors
    /// into the future's own error type.
    pub fn try_run<F, T, E>(&self, future: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<PortalError> + Send + 'static,
    {
        self.run(future)?
    }

    /// Start `future` on the event loop without waiting for it.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_closed() {
            return Err(PortalError::Closed);
        }
        Ok(self.handle.spawn(future))
    }

    /// The runtime handle of the loop, for async callers.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether both portals submit to the same event loop.
    pub fn same_loop(&self, other: &BlockingPortal) -> bool {
        Arc::ptr_eq(&self.closed, &other.closed)
    }

    pub(crate) fn closed_flag(&self) -> &AtomicBool {
        &self.closed
    }
}

fn from_join_error(error: JoinError) -> PortalError {
    if error.is_cancelled() {
        return PortalError::Closed;
    }
    match error.try_into_panic() {
        Ok(payload) => PortalError::Panicked(panic_message(payload)),
        Err(_) => PortalError::Closed,
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}
