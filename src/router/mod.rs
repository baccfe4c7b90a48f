//! Route table and dispatch
//!
//! Routes are registered during startup and the finished [`Router`] is then
//! shared behind an `Arc`. `add_route` needs `&mut self`, so the table cannot
//! change while a dispatch is reading it.

use crate::event::Event;
use crate::handler::{EventHandler, HandlerOutcome};
use crate::matcher::{Binding, Predicate};
use crate::utils::{DispatchError, DispatchResult};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A predicate paired with the handler it triggers.
#[derive(Clone)]
pub struct Route {
    name: String,
    predicate: Predicate,
    handler: Arc<dyn EventHandler>,
}

impl Route {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("predicate", &self.predicate.text())
            .finish_non_exhaustive()
    }
}

/// One (route, binding) pair produced by [`Router::matches`].
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    /// Index of the route in the table
    pub position: usize,
    pub route: &'a Route,
    pub binding: Binding<'a>,
}

impl RouteMatch<'_> {
    /// Stable identity of this entry for a given route table and payload:
    /// `<position>:<route name><binding location>`.
    pub fn key(&self) -> String {
        format!("{}:{}{}", self.position, self.route.name, self.binding.location)
    }
}

/// A dispatch that stopped at a failing handler.
#[derive(Debug)]
pub struct DispatchFailure {
    /// Keys of every entry that has succeeded so far, including those
    /// skipped because an earlier run completed them
    pub completed: Vec<String>,
    pub error: DispatchError,
}

impl From<DispatchError> for DispatchFailure {
    fn from(error: DispatchError) -> Self {
        Self {
            completed: Vec::new(),
            error,
        }
    }
}

/// Ordered route table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Routes are tried in the order they were added.
    pub fn add_route(&mut self, predicate: Predicate, handler: Arc<dyn EventHandler>) -> &mut Self {
        let name = predicate.source_name().to_string();
        self.add_named_route(name, predicate, handler)
    }

    pub fn add_named_route(
        &mut self,
        name: impl Into<String>,
        predicate: Predicate,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        let name = name.into();
        info!(route = %name, predicate = %predicate.text(), "Route registered");
        self.routes.push(Route {
            name,
            predicate,
            handler,
        });
        self
    }

    /// Register one route per predicate file, all sharing `handler`.
    ///
    /// Any unreadable or unparsable file fails the whole call.
    pub fn add_routes_from_files<P: AsRef<Path>>(
        &mut self,
        files: &[P],
        handler: Arc<dyn EventHandler>,
    ) -> DispatchResult<&mut Self> {
        for file in files {
            let predicate = Predicate::from_file(file)?;
            self.add_route(predicate, handler.clone());
        }
        Ok(self)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every binding of every route, in route order and then in binding
    /// order. A route appears once per binding.
    pub fn matches<'a>(&'a self, payload: &'a Value) -> impl Iterator<Item = RouteMatch<'a>> + 'a {
        self.routes.iter().enumerate().flat_map(move |(position, route)| {
            route
                .predicate
                .matches(payload)
                .map(move |binding| RouteMatch { position, route, binding })
        })
    }

    /// Invoke the handler of every match entry, sequentially and in match
    /// order. The first failure is returned unchanged and later entries are
    /// not invoked.
    pub async fn dispatch(&self, event: &Event) -> Result<Vec<HandlerOutcome>, DispatchError> {
        self.dispatch_resuming(event, &[]).await.map_err(|failure| failure.error)
    }

    /// Like [`dispatch`](Self::dispatch), but entries whose key is in
    /// `completed` are skipped. On failure the keys of all entries done so
    /// far come back with the error, so a later call can resume after them.
    #[instrument(skip_all, fields(event_id = %event.id(), event_type = %event.event_type()))]
    pub async fn dispatch_resuming(
        &self,
        event: &Event,
        completed: &[String],
    ) -> Result<Vec<HandlerOutcome>, DispatchFailure> {
        let targets: Vec<(String, String, Arc<dyn EventHandler>)> = self
            .matches(event.payload())
            .map(|m| (m.key(), m.route.name.clone(), m.route.handler.clone()))
            .collect();
        info!(matches = targets.len(), resumed = completed.len(), "Dispatching event");

        let mut done: Vec<String> = completed.to_vec();
        let mut outcomes = Vec::with_capacity(targets.len());
        for (key, route, handler) in targets {
            if completed.contains(&key) {
                debug!(route = %route, key = %key, "Skipping entry completed earlier");
                continue;
            }
            debug!(route = %route, key = %key, "Invoking handler");
            match handler.handle(event).await {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    done.push(key);
                }
                Err(error) => return Err(DispatchFailure { completed: done, error }),
            }
        }
        Ok(outcomes)
    }
}
