//! Retention and logging settings for the action manager.

use std::time::Duration;

use thingworks_blob::DEFAULT_BLOB_EXPIRY;

use crate::logger::DEFAULT_LOG_CAPACITY;

/// Settings shared by every invocation a manager dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConfig {
    /// How long a finished invocation stays queryable.
    pub retention: Duration,
    /// Maximum number of finished invocations kept; the oldest go first.
    /// Unfinished invocations are never evicted and do not count.
    pub max_retained: usize,
    /// Records kept per invocation log.
    pub log_capacity: usize,
    /// Lifetime of handles issued for blob outputs.
    pub blob_expiry: Duration,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(300),
            max_retained: 1000,
            log_capacity: DEFAULT_LOG_CAPACITY,
            blob_expiry: DEFAULT_BLOB_EXPIRY,
        }
    }
}

/// Per-action overrides of [`ActionConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOptions {
    pub retention: Option<Duration>,
    pub blob_expiry: Option<Duration>,
}

impl ActionOptions {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_blob_expiry(mut self, blob_expiry: Duration) -> Self {
        self.blob_expiry = Some(blob_expiry);
        self
    }

    pub(crate) fn resolve(&self, config: &ActionConfig) -> Retention {
        Retention {
            retention: self.retention.unwrap_or(config.retention),
            blob_expiry: self.blob_expiry.unwrap_or(config.blob_expiry),
        }
    }
}

/// Effective lifetimes of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub retention: Duration,
    pub blob_expiry: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        ActionOptions::default().resolve(&ActionConfig::default())
    }
}
