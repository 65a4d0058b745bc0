//! The [`Thing`] abstraction served by a [`ThingServer`](crate::ThingServer).

use std::time::Duration;

use serde_json::Value;
use thingworks_invocation::{ActionError, ActionOptions, ActionOutput};
use thingworks_portal::BlockingPortal;

/// Describes one action a thing offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionDescription {
    pub name: String,
    pub description: Option<String>,
    pub options: ActionOptions,
}

impl ActionDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keep finished invocations of this action for `retention`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.options = self.options.with_retention(retention);
        self
    }

    /// Issue download links for this action's blob outputs valid for `expiry`.
    pub fn with_blob_expiry(mut self, expiry: Duration) -> Self {
        self.options = self.options.with_blob_expiry(expiry);
        self
    }
}

/// What an action receives besides its input.
#[derive(Debug, Clone)]
pub struct ActionContext {
    thing: String,
    action: String,
    portal: BlockingPortal,
}

impl ActionContext {
    pub(crate) fn new(thing: &str, action: &str, portal: BlockingPortal) -> Self {
        Self {
            thing: thing.to_string(),
            action: action.to_string(),
            portal,
        }
    }

    pub fn thing(&self) -> &str {
        &self.thing
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Portal into the server's event loop.
    pub fn portal(&self) -> &BlockingPortal {
        &self.portal
    }
}

/// A hardware or software unit exposing actions.
///
/// A thing is a singleton within its server and is shared by every invocation
/// of its actions, which may run concurrently. Any locking its state needs is
/// up to the implementation.
///
/// `invoke` runs on an invocation's worker thread with the invocation context
/// installed, so it may block, log through
/// [`get_invocation_logger`](thingworks_invocation::get_invocation_logger) and
/// call [`cancellable_sleep`](thingworks_invocation::cancellable_sleep).
pub trait Thing: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn actions(&self) -> Vec<ActionDescription>;

    fn invoke(
        &self,
        action: &str,
        input: Value,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError>;

    /// Called once when the server starts, before any action can run.
    fn setup(&self, _portal: &BlockingPortal) -> Result<(), ActionError> {
        Ok(())
    }

    /// Called once when the server shuts down.
    fn teardown(&self) -> Result<(), ActionError> {
        Ok(())
    }
}
