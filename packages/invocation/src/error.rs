//! Error types for invocations and the action manager.
//!
//! Three families live here:
//!
//! - [`Error`] is returned by the invocation and manager APIs to whoever is
//!   polling or administering invocations.
//! - [`ActionError`] is returned by action code running on a worker thread.
//!   It never escapes the worker: the invocation captures it and moves to a
//!   terminal state.
//! - [`InvocationError`] is the stored, serializable description of a captured
//!   [`ActionError`].

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invocation::{InvocationId, InvocationState};

/// Boxed error accepted from action code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by [`Invocation`](crate::Invocation) and
/// [`ActionManager`](crate::ActionManager) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No invocation with this id is tracked (never existed or evicted).
    #[error("invocation not found: {0}")]
    NotFound(InvocationId),

    /// The operation is not allowed in the invocation's current state.
    #[error("invocation {id} is {state} and cannot be {operation}")]
    InvalidState {
        id: InvocationId,
        state: InvocationState,
        operation: &'static str,
    },

    /// The result was requested before the invocation finished.
    #[error("invocation {0} has not finished")]
    NotReady(InvocationId),

    /// The result was requested from a cancelled invocation.
    #[error("invocation {0} was cancelled")]
    Cancelled(InvocationId),

    /// The action failed; `error` is the captured description.
    #[error("invocation {id} failed: {error}")]
    ActionFailed {
        id: InvocationId,
        error: InvocationError,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias for invocation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What action code returns when it does not produce an output.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Raised at a cancellation check-point after cancellation was requested.
    #[error("the action was cancelled")]
    Cancelled,

    /// A context-dependent helper was called outside any invocation.
    #[error("not running inside an invocation")]
    NoContext,

    /// The input could not be decoded or the output could not be encoded.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a blob failed.
    #[error("blob error: {0}")]
    Blob(#[from] thingworks_blob::Error),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure raised by the action.
    #[error("{0}")]
    Failed(#[source] BoxError),

    /// The action panicked.
    #[error("action panicked: {0}")]
    Panicked(String),
}

impl ActionError {
    /// Wrap an arbitrary error (or message) as an action failure.
    ///
    /// ```ignore
    /// return Err(ActionError::failed("stage is not homed"));
    /// ```
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification stored with the captured error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::NoContext => "no_context",
            Self::Json(_) => "json",
            Self::Blob(_) => "blob",
            Self::Io(_) => "io",
            Self::Failed(_) => "action_failed",
            Self::Panicked(_) => "panic",
        }
    }
}

/// Captured description of an action failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    /// Classification, see [`ActionError::kind`].
    pub kind: String,
    /// The error's own message.
    pub message: String,
    /// Messages of the source chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl InvocationError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }
}

impl From<&ActionError> for InvocationError {
    fn from(error: &ActionError) -> Self {
        let message = error.to_string();
        let mut causes = Vec::new();
        let mut outer = message.clone();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            let text = cause.to_string();
            // Wrappers like `io error: {0}` already end with their source.
            if !outer.ends_with(&text) {
                causes.push(text.clone());
            }
            outer = text;
            source = cause.source();
        }
        Self {
            kind: error.kind().to_string(),
            message,
            causes,
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for InvocationError {}

/// Best-effort message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
