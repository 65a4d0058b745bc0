//! # thingworks-portal
//!
//! Action code runs on plain OS threads and blocks freely. Network I/O, timers
//! and streaming outputs live on a single-threaded tokio event loop. This
//! crate bridges the two:
//!
//! - [`EventLoop`] owns a current-thread runtime on a dedicated thread,
//!   created once at server startup and shut down at server shutdown.
//! - [`BlockingPortal`] lets any worker thread run a future on that loop and
//!   block until it completes, with panics returned as errors.
//!
//! ```ignore
//! let event_loop = EventLoop::start("thing-server")?;
//! let portal = event_loop.portal();
//!
//! std::thread::spawn(move || {
//!     let reading = portal.run(async { sensor.read().await })?;
//!     Ok::<_, PortalError>(reading)
//! });
//! ```
//!
//! Portals are never stored globally. Code that needs one receives it from
//! the server that owns the loop.

pub mod error;
pub mod event_loop;
pub mod portal;

pub use error::{PortalError, Result};
pub use event_loop::EventLoop;
pub use portal::BlockingPortal;
