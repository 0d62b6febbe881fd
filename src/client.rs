//! FeedClient, the façade applications talk to
//!
//! Owns the API client, the action lock, the routing table and every
//! subscription task. User-triggered actions that change server or session
//! state go through the [`ActionSerializer`]; reads do not.

use crate::api::ApiClient;
use crate::config::FeedConfig;
use crate::dispatch::{DispatchRegistry, Handler, RegistryBuilder};
use crate::error::Result;
use crate::notify::{LogNotifier, Notifier};
use crate::routes;
use crate::serializer::{ActionOutcome, ActionSerializer};
use crate::session::{Game, Id, Identity, SessionHandle, SessionState};
use crate::subscription::{ReconnectingSubscription, SubscriptionState};
use crate::supervisor::TaskSupervisor;
use crate::types::{Payload, Scope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Assembles a [`FeedClient`]
///
/// Starts with the well-known routes registered; routes added here replace
/// the defaults for the same key.
pub struct FeedClientBuilder {
    config: FeedConfig,
    notifier: Arc<dyn Notifier>,
    routes: RegistryBuilder,
}

impl FeedClientBuilder {
    /// Send notices somewhere other than the log
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register a handler for `<category>:<command>` events on a scope
    pub fn route(
        mut self,
        scope: Scope,
        category: impl Into<String>,
        command: impl Into<String>,
        handler: Handler,
    ) -> Self {
        self.routes.register(scope, category, command, handler);
        self
    }

    pub fn build(self) -> Result<FeedClient> {
        let session = SessionHandle::new();
        let api = Arc::new(ApiClient::new(&self.config, session)?);
        let registry = Arc::new(self.routes.notifier(self.notifier.clone()).build());

        tracing::debug!(
            api_url = %api.base_url(),
            routes = registry.len(),
            "Feed client ready"
        );

        Ok(FeedClient {
            config: self.config,
            api,
            serializer: ActionSerializer::new(self.notifier.clone()),
            supervisor: TaskSupervisor::new(),
            registry,
            notifier: self.notifier,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }
}

/// Client for one user of the game server
pub struct FeedClient {
    config: FeedConfig,
    api: Arc<ApiClient>,
    serializer: ActionSerializer,
    supervisor: TaskSupervisor,
    registry: Arc<DispatchRegistry>,
    notifier: Arc<dyn Notifier>,
    /// Latest subscription per scope
    subscriptions: Mutex<HashMap<Scope, watch::Receiver<SubscriptionState>>>,
}

impl FeedClient {
    pub fn builder(config: FeedConfig) -> FeedClientBuilder {
        let mut routes = DispatchRegistry::builder();
        routes::register_defaults(&mut routes);
        FeedClientBuilder {
            config,
            notifier: Arc::new(LogNotifier),
            routes,
        }
    }

    /// Client with the default routes and log notices
    pub fn new(config: FeedConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Whether a guarded action is in flight
    pub fn is_busy(&self) -> bool {
        self.serializer.is_locked()
    }

    // ─── Guarded actions ───

    /// Authenticate, open the session and start listening on the user scope
    pub async fn login(&self, login: &str, password: &str) -> Result<ActionOutcome<Identity>> {
        self.serializer
            .run("login", async {
                let token = self.api.authenticate(login, password).await?;
                let identity = self.api.session().establish(token).await?;
                self.subscribe(Scope::User)?;
                Ok(identity)
            })
            .await
    }

    /// Stop every subscription and end the session
    pub async fn logout(&self) -> Result<ActionOutcome<()>> {
        self.serializer
            .run("logout", async {
                self.supervisor.stop_all().await;
                self.api.deauthenticate().await
            })
            .await
    }

    pub async fn create_group(&self, game_id: i64) -> Result<ActionOutcome<Id>> {
        self.serializer
            .run("create group", self.api.create_group(game_id))
            .await
    }

    pub async fn join_group(&self, group_id: &Id) -> Result<ActionOutcome<()>> {
        self.serializer
            .run("join group", self.api.join_group(group_id))
            .await
    }

    pub async fn invite(&self, name: &str) -> Result<ActionOutcome<()>> {
        self.serializer.run("invite", self.api.invite(name)).await
    }

    /// Mark ourselves ready or not ready in the current group
    pub async fn set_ready(&self, ready: bool) -> Result<ActionOutcome<()>> {
        if ready {
            self.serializer.run("ready", self.api.mark_ready()).await
        } else {
            self.serializer
                .run("not ready", self.api.mark_not_ready())
                .await
        }
    }

    pub async fn leave_group(&self) -> Result<ActionOutcome<()>> {
        self.serializer
            .run("leave group", self.api.leave_group())
            .await
    }

    pub async fn start_group(&self) -> Result<ActionOutcome<()>> {
        self.serializer.run("start", self.api.start_group()).await
    }

    // ─── Reads ───

    pub async fn list_games(&self) -> Result<Vec<Game>> {
        self.api.list_games().await
    }

    pub async fn my_group(&self) -> Result<Option<Payload>> {
        self.api.my_group().await
    }

    pub async fn game_by_id(&self, game_id: i64) -> Result<Game> {
        self.api.game_by_id(game_id).await
    }

    /// Snapshot of the session
    pub async fn state(&self) -> SessionState {
        self.api.session().snapshot().await
    }

    // ─── Subscriptions ───

    /// Start consuming a scope's stream
    ///
    /// A scope that is already being consumed is not subscribed twice; the
    /// running subscription's state is returned instead.
    pub fn subscribe(&self, scope: Scope) -> Result<watch::Receiver<SubscriptionState>> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(state) = subscriptions.get(&scope) {
            if *state.borrow() != SubscriptionState::Terminated {
                tracing::debug!(scope = %scope, "Already subscribed");
                return Ok(state.clone());
            }
        }

        let subscription =
            ReconnectingSubscription::new(scope, self.api.clone(), self.registry.clone())
                .with_retry(self.config.retry.clone())
                .with_idle_timeout(self.config.idle_timeout());
        let state = self.supervisor.spawn_subscription(subscription)?;

        tracing::info!(scope = %scope, "Subscribed");
        subscriptions.insert(scope, state.clone());
        Ok(state)
    }

    /// State of the subscription on a scope, if one was started
    pub fn subscription_state(&self, scope: Scope) -> Option<SubscriptionState> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .map(|state| *state.borrow())
    }

    /// Wait until one of the subscriptions started so far terminates
    ///
    /// Returns the scope that ended, or `None` when nothing was subscribed.
    /// Cancelled subscriptions count as terminated too.
    pub async fn next_termination(&self) -> Option<Scope> {
        let watched: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(scope, state)| (*scope, state.clone()))
            .collect();
        if watched.is_empty() {
            return None;
        }

        let waits = watched.into_iter().map(|(scope, mut state)| {
            Box::pin(async move {
                // A dropped sender means the task is gone
                let _ = state
                    .wait_for(|s| *s == SubscriptionState::Terminated)
                    .await;
                scope
            })
        });
        let (scope, _, _) = futures::future::select_all(waits).await;
        Some(scope)
    }

    /// Stop all tasks, end the session if one is open, release the pool
    pub async fn shutdown(&self) {
        self.supervisor.shutdown(self.api.as_ref()).await;
    }
}
