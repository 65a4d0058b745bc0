//! The [`ThingServer`]: things, their action invocations, and blob downloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use thingworks_blob::{BlobId, BlobRegistry};
use thingworks_invocation::{
    ActionManager, ActionOutput, ActionRequest, InvocationFilter, InvocationId, InvocationState,
};
use thingworks_portal::{BlockingPortal, EventLoop};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::model::{InvocationModel, OutputModel};
use crate::thing::{ActionContext, Thing};

struct Running {
    event_loop: EventLoop,
    eviction: JoinHandle<()>,
}

/// Serves a set of things.
///
/// The server owns the action manager, the blob registry and, while running,
/// the event loop. Each of these exists once per server, so several servers
/// can live side by side in one process (as they do in tests).
///
/// ```ignore
/// let mut server = ThingServer::new(ServerConfig::default());
/// server.add_thing(Stage::new())?;
/// server.start()?;
///
/// let id = server.invoke_action("stage", "move", json!({"steps": 10}))?;
/// let model = server.invocation(id)?;
/// ```
pub struct ThingServer {
    config: ServerConfig,
    things: BTreeMap<String, Arc<dyn Thing>>,
    manager: Arc<ActionManager>,
    blobs: Arc<BlobRegistry>,
    running: Option<Running>,
}

impl ThingServer {
    pub fn new(config: ServerConfig) -> Self {
        let manager = ActionManager::new(config.action_config());
        let blobs = BlobRegistry::new(manager.config().blob_expiry);
        Self {
            config,
            things: BTreeMap::new(),
            manager: Arc::new(manager),
            blobs: Arc::new(blobs),
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a thing. Things can only be added while the server is stopped.
    pub fn add_thing(&mut self, thing: impl Thing) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        let name = thing.name().to_string();
        if self.things.contains_key(&name) {
            return Err(Error::DuplicateThing(name));
        }
        tracing::debug!(thing = %name, "server.add_thing");
        self.things.insert(name, Arc::new(thing));
        Ok(())
    }

    pub fn thing_names(&self) -> Vec<&str> {
        self.things.keys().map(String::as_str).collect()
    }

    pub fn thing(&self, name: &str) -> Result<&Arc<dyn Thing>> {
        self.things
            .get(name)
            .ok_or_else(|| Error::ThingNotFound(name.to_string()))
    }

    /// Start the event loop, set up every thing, and begin periodic eviction.
    ///
    /// If a thing fails to set up, the things already set up are torn down
    /// again and the loop is stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.config.validate()?;

        let event_loop = EventLoop::start(self.config.event_loop_name.clone())?;
        let portal = event_loop.portal();

        let mut ready: Vec<&Arc<dyn Thing>> = Vec::new();
        for (name, thing) in &self.things {
            if let Err(source) = thing.setup(&portal) {
                for done in ready.iter().rev() {
                    if let Err(e) = done.teardown() {
                        tracing::warn!(thing = done.name(), error = %e, "server.teardown_failed");
                    }
                }
                event_loop.shutdown()?;
                return Err(Error::Setup {
                    thing: name.clone(),
                    source,
                });
            }
            ready.push(thing);
        }

        let eviction = portal.spawn(evict_periodically(
            Arc::clone(&self.manager),
            Arc::clone(&self.blobs),
            self.config.eviction_interval(),
        ))?;

        tracing::info!(things = self.things.len(), "server.start");
        self.running = Some(Running {
            event_loop,
            eviction,
        });
        Ok(())
    }

    /// Tear down every thing and stop the event loop.
    ///
    /// Every thing is torn down even if some fail; the first failure is
    /// returned. Invocations still running keep their worker threads, but
    /// their portals stop working.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(Error::NotRunning);
        };
        running.eviction.abort();

        let mut first_error = None;
        for (name, thing) in self.things.iter().rev() {
            if let Err(source) = thing.teardown() {
                tracing::warn!(thing = %name, error = %source, "server.teardown_failed");
                first_error.get_or_insert(Error::Teardown {
                    thing: name.clone(),
                    source,
                });
            }
        }
        running.event_loop.shutdown()?;
        tracing::info!("server.shutdown");

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Portal into the running server's event loop.
    pub fn portal(&self) -> Result<BlockingPortal> {
        self.running
            .as_ref()
            .map(|running| running.event_loop.portal())
            .ok_or(Error::NotRunning)
    }

    pub fn manager(&self) -> &ActionManager {
        &self.manager
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    /// Start `thing`'s `action` in the background (`POST /{thing}/{action}`).
    pub fn invoke_action(&self, thing: &str, action: &str, input: Value) -> Result<InvocationId> {
        let portal = self.portal()?;
        let target = Arc::clone(self.thing(thing)?);
        let description = target
            .actions()
            .into_iter()
            .find(|description| description.name == action)
            .ok_or_else(|| Error::ActionNotFound {
                thing: thing.to_string(),
                action: action.to_string(),
            })?;

        let context = ActionContext::new(thing, action, portal);
        let id = self.manager.dispatch_with_options(
            ActionRequest::new(thing, action).with_input(input),
            description.options,
            move |input| target.invoke(context.action(), input, &context),
        )?;
        Ok(id)
    }

    /// `GET /action_invocations/{id}`
    pub fn invocation(&self, id: InvocationId) -> Result<InvocationModel> {
        let snapshot = self.manager.get(id)?;
        Ok(InvocationModel::from_snapshot(&snapshot, &self.blobs))
    }

    /// `GET /action_invocations`, or `GET /{thing}/{action}` with a filter.
    pub fn invocations(&self, filter: &InvocationFilter) -> Vec<InvocationModel> {
        self.manager
            .list(filter)
            .iter()
            .map(|snapshot| InvocationModel::from_snapshot(snapshot, &self.blobs))
            .collect()
    }

    /// `GET /action_invocations/{id}/output`
    pub fn invocation_output(&self, id: InvocationId) -> Result<OutputModel> {
        let invocation = self.manager.invocation(id)?;
        let output = invocation.result()?;
        let description = format!("Output of /{}/{}", invocation.thing(), invocation.action());
        OutputModel::from_output(
            &output,
            &self.blobs,
            invocation.retention().blob_expiry,
            Some(description),
        )
        .ok_or(Error::NoOutput(id))
    }

    /// `DELETE /action_invocations/{id}` on a running invocation.
    pub fn cancel_invocation(&self, id: InvocationId) -> Result<()> {
        self.manager.cancel(id)?;
        Ok(())
    }

    /// `DELETE /action_invocations/{id}` on a finished invocation.
    pub fn delete_invocation(&self, id: InvocationId) -> Result<()> {
        self.manager.remove(id)?;
        Ok(())
    }

    /// Cancel if running, forget if finished.
    ///
    /// The cancel is attempted first; an invocation that has finished by then
    /// is refused by the manager and deleted instead.
    pub fn delete_or_cancel(&self, id: InvocationId) -> Result<InvocationState> {
        let invocation = self.manager.invocation(id)?;
        match self.manager.cancel(id) {
            Ok(()) => Ok(invocation.state()),
            Err(thingworks_invocation::Error::InvalidState { state, .. }) => {
                self.delete_invocation(id)?;
                Ok(state)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// `GET /blob/{id}`: media type and payload.
    ///
    /// File- and URL-backed blobs are read here, so call this from a blocking
    /// context.
    pub fn read_blob(&self, id: BlobId) -> Result<(String, Bytes)> {
        let blob = self.blobs.resolve(id)?;
        let content = blob.content()?;
        Ok((blob.media_type().to_string(), content))
    }

    /// Output of a finished invocation as an [`ActionOutput`], for in-process
    /// callers that do not need the wire model.
    pub fn output(&self, id: InvocationId) -> Result<ActionOutput> {
        Ok(self.manager.invocation(id)?.result()?)
    }
}

impl Drop for ThingServer {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "server.shutdown_failed");
            }
        }
    }
}

impl std::fmt::Debug for ThingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingServer")
            .field("things", &self.thing_names())
            .field("running", &self.is_running())
            .field("manager", &self.manager)
            .field("blobs", &self.blobs)
            .finish()
    }
}

async fn evict_periodically(
    manager: Arc<ActionManager>,
    blobs: Arc<BlobRegistry>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = manager.evict_expired();
        let purged = blobs.purge();
        if evicted > 0 || purged > 0 {
            tracing::debug!(evicted, purged, "server.evict");
        }
    }
}
