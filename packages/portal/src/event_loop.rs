//! The event loop thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use tokio::runtime::Builder;
use tokio::sync::oneshot;

use crate::error::{PortalError, Result};
use crate::portal::{panic_message, BlockingPortal};

/// A single-threaded tokio runtime running on its own OS thread.
///
/// One event loop serves one server instance. Dropping it shuts the loop
/// down; tasks still pending at that point are dropped.
pub struct EventLoop {
    name: String,
    portal: BlockingPortal,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start the loop on a thread called `name`, returning once it is ready
    /// to accept work.
    pub fn start(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(runtime.handle().clone()));
            runtime.block_on(async {
                let _ = shutdown_rx.await;
            });
            runtime.shutdown_background();
        })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| PortalError::StartupAborted)??;

        tracing::debug!(event_loop = %name, "event_loop.start");
        Ok(Self {
            portal: BlockingPortal::new(
                handle,
                Arc::new(AtomicBool::new(false)),
                thread.thread().id(),
            ),
            name,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A portal into this loop. Portals are cheap to clone and stop working
    /// once the loop shuts down.
    pub fn portal(&self) -> BlockingPortal {
        self.portal.clone()
    }

    /// Stop the loop and wait for its thread to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.portal.closed_flag().store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|payload| PortalError::Panicked(panic_message(payload)))?;
            tracing::debug!(event_loop = %self.name, "event_loop.stop");
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(event_loop = %self.name, error = %e, "event_loop.stop_failed");
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("closed", &self.portal.is_closed())
            .finish()
    }
}
