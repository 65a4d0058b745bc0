//! # thingworks-invocation
//!
//! Background execution of Thing actions.
//!
//! Hardware actions block: moving a stage, integrating a spectrum, waiting for
//! a temperature to settle. Each dispatched action therefore runs on its own
//! OS thread as an [`Invocation`], while clients poll its status through the
//! [`ActionManager`].
//!
//! ## Lifecycle
//!
//! ```text
//! pending → running → completed | error | cancelled
//! ```
//!
//! Errors and panics in action code are caught on the worker thread and stored
//! on the invocation; they never reach the dispatcher. Cancellation is
//! cooperative: [`ActionManager::cancel`] sets a flag that action code observes
//! at [`cancellable_sleep`] or [`check_cancelled`].
//!
//! ## Ambient context
//!
//! Action code does not receive its invocation as an argument. The worker
//! thread carries an [`InvocationContext`], reachable from any depth:
//!
//! ```ignore
//! use std::time::Duration;
//! use thingworks_invocation::{
//!     cancellable_sleep, get_invocation_logger, ActionManager, ActionOutput, ActionRequest,
//! };
//!
//! let manager = ActionManager::default();
//! let id = manager.dispatch(ActionRequest::new("furnace", "ramp"), |_input| {
//!     let log = get_invocation_logger();
//!     for setpoint in [100, 200, 300] {
//!         log.info(format!("setpoint {}", setpoint));
//!         cancellable_sleep(Duration::from_secs(5))?;
//!     }
//!     Ok(ActionOutput::None)
//! })?;
//!
//! manager.cancel(id)?;
//! ```
//!
//! ## Retention
//!
//! Finished invocations stay queryable for [`ActionConfig::retention`] and at
//! most [`ActionConfig::max_retained`] of them are kept. Evicting an
//! invocation drops its output, which is what invalidates any blob handles
//! issued for it.

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod invocation;
pub mod logger;
pub mod manager;

pub use cancel::{CancelHook, CancelState};
pub use config::{ActionConfig, ActionOptions, Retention};
pub use context::{
    cancellable_sleep, check_cancelled, current_invocation_id, get_invocation_logger,
    spawn_with_context, ContextGuard, ContextThread, InvocationContext,
};
pub use error::{ActionError, BoxError, Error, InvocationError, Result};
pub use invocation::{
    ActionFn, ActionOutput, ActionRequest, Invocation, InvocationId, InvocationSnapshot,
    InvocationState, InvocationStatus,
};
pub use logger::{
    InvocationLogLayer, InvocationLogger, LogBuffer, LogLevel, LogRecord, DEFAULT_LOG_CAPACITY,
    LOG_TARGET,
};
pub use manager::{ActionManager, InvocationFilter};
