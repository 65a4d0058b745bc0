//! Error types for the blocking portal.

use thiserror::Error;

/// Errors returned when submitting work through a
/// [`BlockingPortal`](crate::BlockingPortal).
#[derive(Debug, Error)]
pub enum PortalError {
    /// The event loop has been shut down.
    #[error("event loop is closed")]
    Closed,

    /// The portal was used on the event loop's own thread, which would block
    /// the loop forever.
    #[error("blocking portal called from its own event loop")]
    OnEventLoop,

    /// The submitted future panicked on the event loop.
    #[error("task panicked on the event loop: {0}")]
    Panicked(String),

    /// The event loop thread or runtime could not be created.
    #[error("failed to start event loop: {0}")]
    Start(#[from] std::io::Error),

    /// The event loop thread died before reporting back.
    #[error("event loop thread exited during startup")]
    StartupAborted,
}

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;
