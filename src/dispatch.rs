//! Routing table from (scope, category, command) to handlers
//!
//! The table is assembled once with a `RegistryBuilder` before any
//! subscription starts, then frozen into a `DispatchRegistry` that is only
//! ever read. Subscriptions share it behind an `Arc`.

use crate::notify::{LogNotifier, Notice, NoticeKind, Notifier};
use crate::types::{EventMessage, Payload, Scope};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Handler invoked inline on the consumption loop
pub type SyncHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Handler whose future is spawned and never awaited by the loop
pub type AsyncHandler = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// A registered event handler
#[derive(Clone)]
pub enum Handler {
    /// Runs to completion before the next message is read; keep it short
    Inline(SyncHandler),
    /// Runs as an independent task
    Spawned(AsyncHandler),
}

impl Handler {
    /// Wrap a synchronous callback
    pub fn sync(f: impl Fn(Payload) + Send + Sync + 'static) -> Self {
        Handler::Inline(Arc::new(f))
    }

    /// Wrap an asynchronous callback
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Handler::Spawned(Arc::new(move |payload| f(payload).boxed()))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Inline(_) => f.write_str("Handler::Inline"),
            Handler::Spawned(_) => f.write_str("Handler::Spawned"),
        }
    }
}

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A synchronous handler ran to completion
    Inline,
    /// An asynchronous handler was spawned
    Spawned,
    /// No handler is registered for the route
    Unhandled,
}

/// scope → category → command → handler
type RouteTable = HashMap<Scope, HashMap<String, HashMap<String, Handler>>>;

/// Collects routes during startup
pub struct RegistryBuilder {
    routes: RouteTable,
    notifier: Arc<dyn Notifier>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Report routed events to this notifier instead of the log
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register a handler for a route
    ///
    /// Registering the same route twice keeps the later handler.
    pub fn register(
        &mut self,
        scope: Scope,
        category: impl Into<String>,
        command: impl Into<String>,
        handler: Handler,
    ) -> &mut Self {
        let category = category.into();
        let command = command.into();

        let previous = self
            .routes
            .entry(scope)
            .or_default()
            .entry(category.clone())
            .or_default()
            .insert(command.clone(), handler);

        if previous.is_some() {
            tracing::warn!(
                scope = %scope,
                category = %category,
                command = %command,
                "Handler registered twice, keeping the last one"
            );
        }
        self
    }

    /// Freeze the table
    pub fn build(self) -> DispatchRegistry {
        DispatchRegistry {
            routes: self.routes,
            notifier: self.notifier,
        }
    }
}

/// Immutable routing table
pub struct DispatchRegistry {
    routes: RouteTable,
    notifier: Arc<dyn Notifier>,
}

impl DispatchRegistry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up the handler for a route
    pub fn resolve(&self, scope: Scope, category: &str, command: &str) -> Option<&Handler> {
        self.routes.get(&scope)?.get(category)?.get(command)
    }

    /// Route an event to its handler
    ///
    /// Unknown routes are logged and skipped. Asynchronous handlers must run
    /// inside a tokio runtime; they are spawned and not awaited.
    pub fn resolve_and_dispatch(&self, scope: Scope, message: EventMessage) -> DispatchOutcome {
        let handler = message
            .route()
            .and_then(|(category, command)| self.resolve(scope, category, command));

        let Some(handler) = handler else {
            tracing::warn!(
                scope = %scope,
                event_type = %message.event_type,
                "Cannot handle event type for this queue"
            );
            return DispatchOutcome::Unhandled;
        };

        let EventMessage {
            event_type,
            payload,
        } = message;

        tracing::debug!(scope = %scope, event_type = %event_type, "Event received");
        self.notifier.notify(Notice::new(NoticeKind::EventReceived {
            scope,
            event_type,
        }));

        match handler {
            Handler::Inline(f) => {
                f(payload);
                DispatchOutcome::Inline
            }
            Handler::Spawned(f) => {
                tokio::spawn(f(payload));
                DispatchOutcome::Spawned
            }
        }
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes
            .values()
            .flat_map(|categories| categories.values())
            .map(|commands| commands.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("routes", &self.len())
            .finish()
    }
}
