//! One run of an action on its own worker thread.
//!
//! An [`Invocation`] moves through
//!
//! ```text
//! pending ──start()──▶ running ──┬──▶ completed
//!                                ├──▶ error
//!                                └──▶ cancelled
//! ```
//!
//! `running` is set synchronously by [`Invocation::start`] before the worker
//! thread exists, so no observer ever sees `pending` followed directly by a
//! terminal state. Terminal states are final. Every transition happens under
//! the invocation's progress lock, and status reads take the same lock, so a
//! reader never sees a half-written transition.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thingworks_blob::Blob;
use uuid::Uuid;

use crate::cancel::{CancelHook, CancelState};
use crate::config::Retention;
use crate::context::{run_in_context, InvocationContext};
use crate::error::{ActionError, Error, InvocationError, Result};
use crate::logger::{InvocationLogger, LogBuffer, LogRecord};

/// Unique identifier for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Create a new random InvocationId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an InvocationId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, for thread names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InvocationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed action produced.
#[derive(Debug, Clone, Default)]
pub enum ActionOutput {
    #[default]
    None,
    Value(Value),
    /// A binary output. The invocation holds the owning reference.
    Blob(Arc<Blob>),
}

impl ActionOutput {
    /// Serialize any value into a JSON output.
    pub fn value(value: impl Serialize) -> std::result::Result<Self, ActionError> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    pub fn blob(blob: Blob) -> Self {
        Self::Blob(Arc::new(blob))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Arc<Blob>> {
        match self {
            Self::Blob(blob) => Some(blob),
            _ => None,
        }
    }
}

impl From<Value> for ActionOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Blob> for ActionOutput {
    fn from(blob: Blob) -> Self {
        Self::blob(blob)
    }
}

impl From<Arc<Blob>> for ActionOutput {
    fn from(blob: Arc<Blob>) -> Self {
        Self::Blob(blob)
    }
}

impl From<()> for ActionOutput {
    fn from(_: ()) -> Self {
        Self::None
    }
}

/// The callable an invocation runs, taking the action input.
pub type ActionFn =
    Box<dyn FnOnce(Value) -> std::result::Result<ActionOutput, ActionError> + Send + 'static>;

/// Which action to run and with what input.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub thing: String,
    pub action: String,
    pub input: Value,
}

impl ActionRequest {
    pub fn new(thing: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            action: action.into(),
            input: Value::Null,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Point-in-time view of an invocation's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationStatus {
    pub id: InvocationId,
    pub thing: String,
    pub action: String,
    pub state: InvocationState,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub log_count: u64,
    pub cancel: CancelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
}

/// Status plus input, output and log, as served to polling clients.
#[derive(Debug, Clone)]
pub struct InvocationSnapshot {
    pub status: InvocationStatus,
    pub input: Value,
    /// Set only when the invocation completed.
    pub output: Option<ActionOutput>,
    pub log: Vec<LogRecord>,
    pub retention: Retention,
}

struct Progress {
    state: InvocationState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    ended: Option<Instant>,
    output: Option<ActionOutput>,
    error: Option<InvocationError>,
    target: Option<ActionFn>,
}

enum Outcome {
    Completed(ActionOutput),
    Cancelled,
    Failed(InvocationError),
}

struct Shared {
    id: InvocationId,
    request: ActionRequest,
    retention: Retention,
    requested_at: DateTime<Utc>,
    cancel: CancelHook,
    log: Arc<LogBuffer>,
    progress: Mutex<Progress>,
    finished: Condvar,
}

/// Handle to one invocation. Clones share the same invocation.
#[derive(Clone)]
pub struct Invocation {
    shared: Arc<Shared>,
}

impl Invocation {
    /// Create a pending invocation of `target`.
    pub fn new(
        request: ActionRequest,
        target: ActionFn,
        retention: Retention,
        log_capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: InvocationId::new(),
                request,
                retention,
                requested_at: Utc::now(),
                cancel: CancelHook::new(),
                log: Arc::new(LogBuffer::new(log_capacity)),
                progress: Mutex::new(Progress {
                    state: InvocationState::Pending,
                    started_at: None,
                    ended_at: None,
                    ended: None,
                    output: None,
                    error: None,
                    target: Some(target),
                }),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> InvocationId {
        self.shared.id
    }

    pub fn thing(&self) -> &str {
        &self.shared.request.thing
    }

    pub fn action(&self) -> &str {
        &self.shared.request.action
    }

    pub fn input(&self) -> &Value {
        &self.shared.request.input
    }

    pub fn retention(&self) -> Retention {
        self.shared.retention
    }

    /// Logger writing into this invocation's log.
    pub fn logger(&self) -> InvocationLogger {
        InvocationLogger::new(self.shared.id, Arc::clone(&self.shared.log))
    }

    /// Move to `running` and run the target on a new worker thread.
    ///
    /// Fails with [`Error::InvalidState`] unless the invocation is pending. If
    /// the thread cannot be spawned the invocation ends in `error`.
    pub fn start(&self) -> Result<()> {
        let target = {
            let mut progress = self.shared.lock();
            let target = match (progress.state, progress.target.take()) {
                (InvocationState::Pending, Some(target)) => target,
                (state, _) => {
                    return Err(Error::InvalidState {
                        id: self.shared.id,
                        state,
                        operation: "started",
                    })
                }
            };
            progress.state = InvocationState::Running;
            progress.started_at = Some(Utc::now());
            target
        };

        tracing::debug!(
            invocation_id = %self.shared.id,
            thing = %self.shared.request.thing,
            action = %self.shared.request.action,
            "invocation.start"
        );

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("invocation-{}", self.shared.id.short()))
            .spawn(move || shared.run(target));

        if let Err(e) = spawned {
            self.shared
                .finish(Outcome::Failed(InvocationError::new("spawn", e.to_string())));
            return Err(Error::Spawn(e));
        }
        Ok(())
    }

    pub fn state(&self) -> InvocationState {
        self.shared.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn status(&self) -> InvocationStatus {
        let progress = self.shared.lock();
        self.shared.status_locked(&progress)
    }

    /// Status, output and a copy of the log, all read under one lock.
    pub fn snapshot(&self) -> InvocationSnapshot {
        let progress = self.shared.lock();
        InvocationSnapshot {
            status: self.shared.status_locked(&progress),
            input: self.shared.request.input.clone(),
            output: progress.output.clone(),
            log: self.shared.log.snapshot(),
            retention: self.shared.retention,
        }
    }

    /// The output of a completed invocation.
    pub fn result(&self) -> Result<ActionOutput> {
        let progress = self.shared.lock();
        match progress.state {
            InvocationState::Completed => Ok(progress.output.clone().unwrap_or_default()),
            InvocationState::Cancelled => Err(Error::Cancelled(self.shared.id)),
            InvocationState::Error => Err(Error::ActionFailed {
                id: self.shared.id,
                error: progress
                    .error
                    .clone()
                    .unwrap_or_else(|| InvocationError::new("unknown", "no error recorded")),
            }),
            InvocationState::Pending | InvocationState::Running => {
                Err(Error::NotReady(self.shared.id))
            }
        }
    }

    /// Ask the worker to stop at its next check-point. Does not wait.
    ///
    /// Has no effect on the state of an invocation that already finished.
    pub fn request_cancel(&self) {
        if self.shared.cancel.request() {
            tracing::debug!(invocation_id = %self.shared.id, "invocation.cancel_requested");
        }
    }

    pub fn cancel_state(&self) -> CancelState {
        self.shared.cancel.state()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.shared.log.snapshot()
    }

    /// Block until the invocation finishes or `timeout` passes, returning
    /// the state at that point.
    pub fn wait(&self, timeout: Duration) -> InvocationState {
        let progress = self.shared.lock();
        let (progress, _) = self
            .shared
            .finished
            .wait_timeout_while(progress, timeout, |p| !p.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        progress.state
    }

    /// Drop the stored output, releasing any blob it owns.
    ///
    /// Blob handles issued for the output stop resolving at once, however
    /// many clones of this handle are still around. A completed invocation
    /// reports an empty output afterwards.
    pub(crate) fn release_output(&self) {
        let output = self.shared.lock().output.take();
        drop(output);
    }

    /// Whether the invocation finished at least one retention window before
    /// `now`. Unfinished invocations never expire.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.shared.lock().ended {
            Some(ended) => now.saturating_duration_since(ended) >= self.shared.retention.retention,
            None => false,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.shared.id)
            .field("thing", &self.shared.request.thing)
            .field("action", &self.shared.request.action)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn run(self: Arc<Self>, target: ActionFn) {
        let logger = InvocationLogger::new(self.id, Arc::clone(&self.log));
        let context = InvocationContext::new(self.id, self.cancel.clone(), logger.clone());
        let input = self.request.input.clone();

        let outcome = match run_in_context(&context, || target(input)) {
            Ok(output) => Outcome::Completed(output),
            Err(ActionError::Cancelled) => {
                logger.info(format!("Invocation {} was cancelled.", self.id));
                Outcome::Cancelled
            }
            Err(error) => {
                let captured = InvocationError::from(&error);
                logger.error_with_kind(captured.kind.clone(), captured.to_string());
                Outcome::Failed(captured)
            }
        };

        self.finish(outcome);
    }

    fn finish(&self, outcome: Outcome) {
        let state = {
            let mut progress = self.lock();
            if progress.state.is_terminal() {
                return;
            }
            let state = match outcome {
                Outcome::Completed(output) => {
                    progress.output = Some(output);
                    InvocationState::Completed
                }
                Outcome::Cancelled => InvocationState::Cancelled,
                Outcome::Failed(error) => {
                    progress.error = Some(error);
                    InvocationState::Error
                }
            };
            progress.state = state;
            progress.ended_at = Some(Utc::now());
            progress.ended = Some(Instant::now());
            self.log.freeze();
            state
        };
        self.finished.notify_all();

        tracing::info!(
            invocation_id = %self.id,
            thing = %self.request.thing,
            action = %self.request.action,
            state = %state,
            "invocation.finished"
        );
    }

    fn status_locked(&self, progress: &Progress) -> InvocationStatus {
        InvocationStatus {
            id: self.id,
            thing: self.request.thing.clone(),
            action: self.request.action.clone(),
            state: progress.state,
            requested_at: self.requested_at,
            started_at: progress.started_at,
            ended_at: progress.ended_at,
            log_count: self.log.total(),
            cancel: self.cancel.state(),
            error: progress.error.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
