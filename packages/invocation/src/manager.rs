//! Registry of invocations with retention and eviction.
//!
//! The [`ActionManager`] owns every invocation it dispatches. All registry
//! mutations (insert, evict, cancel, remove) happen under one lock; reads
//! clone the invocation handle under that lock and take the snapshot after
//! releasing it, so eviction never races a snapshot in progress.
//!
//! Eviction runs on every registry access, and can also be triggered with
//! [`ActionManager::evict_expired`]. It drops
//!
//! 1. finished invocations whose retention window has passed, then
//! 2. the oldest finished invocations beyond [`ActionConfig::max_retained`].
//!
//! Invocations that have not finished are never evicted, however old and
//! however many.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;

use crate::config::{ActionConfig, ActionOptions};
use crate::error::{ActionError, Error, Result};
use crate::invocation::{
    ActionOutput, ActionRequest, Invocation, InvocationId, InvocationSnapshot,
};

/// Restricts [`ActionManager::list`] to one thing and/or action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationFilter {
    pub thing: Option<String>,
    pub action: Option<String>,
}

impl InvocationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn thing(thing: impl Into<String>) -> Self {
        Self {
            thing: Some(thing.into()),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn matches(&self, invocation: &Invocation) -> bool {
        self.thing.as_deref().map_or(true, |t| t == invocation.thing())
            && self
                .action
                .as_deref()
                .map_or(true, |a| a == invocation.action())
    }
}

#[derive(Default)]
struct Registry {
    invocations: HashMap<InvocationId, Invocation>,
    /// Insertion order, oldest first.
    order: VecDeque<InvocationId>,
}

impl Registry {
    fn insert(&mut self, invocation: Invocation) {
        self.order.push_back(invocation.id());
        self.invocations.insert(invocation.id(), invocation);
    }

    fn remove_all(&mut self, ids: &HashSet<InvocationId>) {
        self.order.retain(|id| !ids.contains(id));
        self.invocations.retain(|id, invocation| {
            if ids.contains(id) {
                invocation.release_output();
                return false;
            }
            true
        });
    }

    fn in_order(&self) -> impl Iterator<Item = &Invocation> {
        self.order.iter().filter_map(|id| self.invocations.get(id))
    }
}

/// Dispatches actions and tracks their invocations.
pub struct ActionManager {
    config: ActionConfig,
    registry: Mutex<Registry>,
}

impl ActionManager {
    pub fn new(config: ActionConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Start `target` on a new worker thread and return its id immediately.
    pub fn dispatch<F>(&self, request: ActionRequest, target: F) -> Result<InvocationId>
    where
        F: FnOnce(Value) -> std::result::Result<ActionOutput, ActionError> + Send + 'static,
    {
        self.dispatch_with_options(request, ActionOptions::default(), target)
    }

    /// As [`dispatch`](Self::dispatch), overriding retention settings.
    pub fn dispatch_with_options<F>(
        &self,
        request: ActionRequest,
        options: ActionOptions,
        target: F,
    ) -> Result<InvocationId>
    where
        F: FnOnce(Value) -> std::result::Result<ActionOutput, ActionError> + Send + 'static,
    {
        let invocation = Invocation::new(
            request,
            Box::new(target),
            options.resolve(&self.config),
            self.config.log_capacity,
        );
        let id = invocation.id();
        {
            let mut registry = self.lock();
            self.evict_locked(&mut registry);
            registry.insert(invocation.clone());
        }
        invocation.start()?;
        tracing::info!(
            invocation_id = %id,
            thing = invocation.thing(),
            action = invocation.action(),
            "action_manager.dispatch"
        );
        Ok(id)
    }

    /// Handle to a tracked invocation.
    pub fn invocation(&self, id: InvocationId) -> Result<Invocation> {
        let mut registry = self.lock();
        self.evict_locked(&mut registry);
        registry
            .invocations
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    pub fn get(&self, id: InvocationId) -> Result<InvocationSnapshot> {
        Ok(self.invocation(id)?.snapshot())
    }

    /// Snapshots of tracked invocations in dispatch order, oldest first.
    pub fn list(&self, filter: &InvocationFilter) -> Vec<InvocationSnapshot> {
        let invocations: Vec<Invocation> = {
            let mut registry = self.lock();
            self.evict_locked(&mut registry);
            registry
                .in_order()
                .filter(|invocation| filter.matches(invocation))
                .cloned()
                .collect()
        };
        invocations.iter().map(Invocation::snapshot).collect()
    }

    /// Request cancellation of a running invocation.
    ///
    /// Fails with [`Error::InvalidState`] if the invocation already finished;
    /// its state is left untouched.
    pub fn cancel(&self, id: InvocationId) -> Result<()> {
        let mut registry = self.lock();
        self.evict_locked(&mut registry);
        let invocation = registry.invocations.get(&id).ok_or(Error::NotFound(id))?;
        let state = invocation.state();
        if state.is_terminal() {
            return Err(Error::InvalidState {
                id,
                state,
                operation: "cancelled",
            });
        }
        invocation.request_cancel();
        Ok(())
    }

    /// Forget a finished invocation now rather than waiting for eviction.
    ///
    /// The returned handle no longer holds the output, so blob handles issued
    /// for it resolve to [`thingworks_blob::Error::Gone`].
    pub fn remove(&self, id: InvocationId) -> Result<Invocation> {
        let mut registry = self.lock();
        let invocation = registry.invocations.get(&id).ok_or(Error::NotFound(id))?;
        let state = invocation.state();
        if !state.is_terminal() {
            return Err(Error::InvalidState {
                id,
                state,
                operation: "deleted",
            });
        }
        registry.order.retain(|existing| *existing != id);
        let invocation = registry.invocations.remove(&id).ok_or(Error::NotFound(id))?;
        invocation.release_output();
        tracing::debug!(invocation_id = %id, "action_manager.remove");
        Ok(invocation)
    }

    /// Apply the retention policy now, returning how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let mut registry = self.lock();
        self.evict_locked(&mut registry)
    }

    /// Number of tracked invocations, finished or not.
    pub fn len(&self) -> usize {
        self.lock().invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_locked(&self, registry: &mut Registry) -> usize {
        let now = Instant::now();
        let mut evict: HashSet<InvocationId> = registry
            .in_order()
            .filter(|invocation| invocation.is_expired(now))
            .map(Invocation::id)
            .collect();

        let finished: Vec<InvocationId> = registry
            .in_order()
            .filter(|invocation| !evict.contains(&invocation.id()) && invocation.is_terminal())
            .map(Invocation::id)
            .collect();
        let excess = finished.len().saturating_sub(self.config.max_retained);
        evict.extend(finished.into_iter().take(excess));

        if evict.is_empty() {
            return 0;
        }
        registry.remove_all(&evict);
        tracing::debug!(
            evicted = evict.len(),
            remaining = registry.order.len(),
            "action_manager.evict"
        );
        evict.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ActionManager {
    fn default() -> Self {
        Self::new(ActionConfig::default())
    }
}

impl std::fmt::Debug for ActionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionManager")
            .field("config", &self.config)
            .field("invocations", &self.len())
            .finish()
    }
}
