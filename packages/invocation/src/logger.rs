//! Per-invocation log capture.
//!
//! Every invocation owns a bounded [`LogBuffer`]. Records reach it two ways:
//!
//! - through an [`InvocationLogger`], obtained with
//!   [`get_invocation_logger`](crate::get_invocation_logger) or from the
//!   invocation context;
//! - through plain `tracing` events emitted on a worker thread, when the
//!   [`InvocationLogLayer`] is installed in the subscriber.
//!
//! Records written through a logger are also emitted as `tracing` events
//! under [`LOG_TARGET`], so the process log sees them too. The capture layer
//! skips that target to avoid storing them twice.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::context::InvocationContext;
use crate::invocation::InvocationId;

/// `tracing` target of events emitted by [`InvocationLogger`].
pub const LOG_TARGET: &str = "thingworks::invocation";

/// Default number of records kept per invocation.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity, ten apart per level.
    pub fn levelno(self) -> u8 {
        match self {
            Self::Debug => 10,
            Self::Info => 20,
            Self::Warning => 30,
            Self::Error => 40,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => Self::Debug,
            Level::INFO => Self::Info,
            Level::WARN => Self::Warning,
            Level::ERROR => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub created: DateTime<Utc>,
    /// Name of the emitting thread, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// `tracing` target for records captured by [`InvocationLogLayer`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Classification of the error being reported, for error records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            created: Utc::now(),
            thread: thread::current().name().map(str::to_string),
            target: None,
            error_kind: None,
        }
    }
}

#[derive(Debug)]
struct BufferInner {
    records: VecDeque<LogRecord>,
    capacity: usize,
    total: u64,
    frozen: bool,
}

/// Bounded, ordered store of one invocation's records.
///
/// When full, the oldest record is dropped. Once frozen (the invocation
/// reached a terminal state) further records are discarded.
#[derive(Debug)]
pub struct LogBuffer {
    inner: Mutex<BufferInner>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                capacity,
                total: 0,
                frozen: false,
            }),
        }
    }

    /// Append a record; returns `false` if the buffer is frozen.
    pub fn push(&self, record: LogRecord) -> bool {
        let mut inner = self.lock();
        if inner.frozen {
            return false;
        }
        if inner.capacity == 0 {
            inner.total += 1;
            return true;
        }
        if inner.records.len() == inner.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
        inner.total += 1;
        true
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Number of records ever accepted, including any dropped for capacity.
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn freeze(&self) {
        self.lock().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Writes records into one invocation's log.
///
/// A logger obtained outside any invocation is disconnected: its records only
/// go to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct InvocationLogger {
    invocation_id: Option<InvocationId>,
    buffer: Option<Arc<LogBuffer>>,
}

impl InvocationLogger {
    pub fn new(invocation_id: InvocationId, buffer: Arc<LogBuffer>) -> Self {
        Self {
            invocation_id: Some(invocation_id),
            buffer: Some(buffer),
        }
    }

    /// A logger that is not attached to any invocation.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn invocation_id(&self) -> Option<InvocationId> {
        self.invocation_id
    }

    pub fn is_connected(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(LogRecord::new(level, message));
    }

    /// Log an error record tagged with `kind`.
    pub fn error_with_kind(&self, kind: impl Into<String>, message: impl Into<String>) {
        let mut record = LogRecord::new(LogLevel::Error, message);
        record.error_kind = Some(kind.into());
        self.emit(record);
    }

    /// The records captured so far, or nothing for a disconnected logger.
    pub fn records(&self) -> Vec<LogRecord> {
        self.buffer
            .as_ref()
            .map(|buffer| buffer.snapshot())
            .unwrap_or_default()
    }

    fn emit(&self, record: LogRecord) {
        let id = self
            .invocation_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        match record.level {
            LogLevel::Debug => {
                tracing::debug!(target: LOG_TARGET, invocation_id = %id, "{}", record.message)
            }
            LogLevel::Info => {
                tracing::info!(target: LOG_TARGET, invocation_id = %id, "{}", record.message)
            }
            LogLevel::Warning => {
                tracing::warn!(target: LOG_TARGET, invocation_id = %id, "{}", record.message)
            }
            LogLevel::Error => {
                tracing::error!(target: LOG_TARGET, invocation_id = %id, "{}", record.message)
            }
        }
        self.capture(record);
    }

    /// Store without emitting to `tracing`.
    fn capture(&self, record: LogRecord) {
        if let Some(buffer) = &self.buffer {
            buffer.push(record);
        }
    }
}

/// `tracing` layer that copies events emitted inside an invocation into its
/// log.
///
/// ```ignore
/// use tracing_subscriber::prelude::*;
///
/// tracing_subscriber::registry()
///     .with(tracing_subscriber::fmt::layer())
///     .with(InvocationLogLayer::new())
///     .init();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationLogLayer {
    _private: (),
}

impl InvocationLogLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Subscriber> Layer<S> for InvocationLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() == LOG_TARGET {
            return;
        }
        let Some(context) = InvocationContext::current() else {
            return;
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new((*metadata.level()).into(), visitor.finish());
        record.target = Some(metadata.target().to_string());
        context.logger().capture(record);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        let mut message = self.message.unwrap_or_default();
        for field in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&field);
        }
        message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
