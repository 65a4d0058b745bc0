//! Server configuration.
//!
//! ```json
//! {
//!     "retention_secs": 600,
//!     "max_retained": 200,
//!     "blob_expiry_secs": 120,
//!     "log_filter": "info,thingworks=debug"
//! }
//! ```
//!
//! Every field is optional. Reading the file is up to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thingworks_invocation::ActionConfig;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds a finished invocation stays queryable.
    pub retention_secs: u64,
    /// Finished invocations kept at most.
    pub max_retained: usize,
    /// Log records kept per invocation.
    pub log_capacity: usize,
    /// Seconds a blob download link stays valid.
    pub blob_expiry_secs: u64,
    /// Seconds between background eviction passes.
    pub eviction_interval_secs: u64,
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
    /// Name of the event loop thread.
    pub event_loop_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let actions = ActionConfig::default();
        Self {
            retention_secs: actions.retention.as_secs(),
            max_retained: actions.max_retained,
            log_capacity: actions.log_capacity,
            blob_expiry_secs: actions.blob_expiry.as_secs(),
            eviction_interval_secs: 30,
            log_filter: "info".to_string(),
            event_loop_name: "thingworks-event-loop".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eviction_interval_secs == 0 {
            return Err(Error::Config(
                "eviction_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.event_loop_name.is_empty() {
            return Err(Error::Config("event_loop_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn action_config(&self) -> ActionConfig {
        ActionConfig {
            retention: Duration::from_secs(self.retention_secs),
            max_retained: self.max_retained,
            log_capacity: self.log_capacity,
            blob_expiry: Duration::from_secs(self.blob_expiry_secs),
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}
