//! HTTP client for the game server API
//!
//! One `reqwest::Client` pool serves every action and every stream. Action
//! requests carry the configured timeout and are retried only when the
//! connection could not be made; a request that timed out may already have
//! reached the server and is never sent again. Stream requests have no
//! timeout (the subscription's idle timeout bounds them) and are retried by
//! the subscription loop instead.

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::retry::{with_retry, RetryConfig};
use crate::session::{Game, Id, SessionHandle};
use crate::subscription::{ByteStream, Connector};
use crate::supervisor::Teardown;
use crate::types::{Payload, Scope};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Scheme prefix of the `Authorization` header, colon included, as the
/// server expects it
pub const AUTHORIZATION_SCHEME: &str = "Bearer:";

/// Upper bound on the logout request sent during shutdown
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct UserIdBody {
    userid: Id,
}

#[derive(Deserialize)]
struct GroupIdBody {
    groupid: Id,
}

/// Client for the action endpoints and the per-scope streams
pub struct ApiClient {
    base_url: Url,
    /// `None` once the pool has been released
    http: RwLock<Option<reqwest::Client>>,
    session: SessionHandle,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &FeedConfig, session: SessionHandle) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FeedError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url()?,
            http: RwLock::new(Some(http)),
            session,
            retry: config.retry.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Release the connection pool; later requests fail with `Closed`
    pub fn close(&self) {
        let released = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            tracing::info!("Connection pool released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    // ─── Authentication ───

    /// Create an account, returning the new user id
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Id> {
        let body = json!({"username": username, "email": email, "password": password});
        let res = self
            .send("register", Method::POST, self.url("v1/auth/register")?, Some(&body))
            .await?;
        let res = expect_status(res, StatusCode::OK).await?;
        Ok(res.json::<UserIdBody>().await?.userid)
    }

    /// Exchange credentials for a token
    ///
    /// The session is not touched; callers decide what to do with the token.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<String> {
        let body = json!({"login": login, "password": password});
        let res = self
            .send("authenticate", Method::POST, self.url("v1/auth")?, Some(&body))
            .await?;
        let res = expect_status(res, StatusCode::OK).await?;
        Ok(res.json::<TokenBody>().await?.token)
    }

    /// End the server-side session and clear the local one
    pub async fn deauthenticate(&self) -> Result<()> {
        let res = self
            .send("deauthenticate", Method::DELETE, self.url("v1/auth/")?, None)
            .await?;
        self.logged_out(res).await
    }

    /// Like [`deauthenticate`](Self::deauthenticate), but a single attempt
    /// bounded by [`TEARDOWN_TIMEOUT`]
    pub async fn deauthenticate_once(&self) -> Result<()> {
        let timeout = self.request_timeout.min(TEARDOWN_TIMEOUT);
        let res = self
            .send_once("deauthenticate", Method::DELETE, self.url("v1/auth/")?, None, timeout)
            .await?;
        self.logged_out(res).await
    }

    async fn logged_out(&self, res: Response) -> Result<()> {
        expect_status(res, StatusCode::NO_CONTENT).await?;
        self.session.clear().await;
        tracing::info!("Logged out");
        Ok(())
    }

    // ─── Games ───

    /// Games offered by the server, fetched once per session handle
    pub async fn list_games(&self) -> Result<Vec<Game>> {
        if let Some(games) = self.session.cached_games().await {
            return Ok(games);
        }

        let res = self
            .send("list games", Method::GET, self.url("v1/games")?, None)
            .await?;
        let res = expect_status(res, StatusCode::OK).await?;
        let games: Vec<Game> = res.json().await?;

        tracing::debug!(count = games.len(), "Game list cached");
        self.session.cache_games(games.clone()).await;
        Ok(games)
    }

    /// Look a game up, trying the cached list before the server
    pub async fn game_by_id(&self, game_id: i64) -> Result<Game> {
        if let Some(games) = self.session.cached_games().await {
            if let Some(game) = games.into_iter().find(|g| g.id == game_id) {
                return Ok(game);
            }
        }

        let url = self.url(&format!("v1/games/byid/{}", game_id))?;
        let res = self.send("game by id", Method::GET, url, None).await?;
        let res = expect_status(res, StatusCode::OK).await?;
        Ok(res.json().await?)
    }

    // ─── Groups ───

    /// Create a group for a game and remember it as ours
    pub async fn create_group(&self, game_id: i64) -> Result<Id> {
        let url = self.url(&format!("v1/groups/create/{}", game_id))?;
        let res = self.send("create group", Method::POST, url, None).await?;
        let res = expect_status(res, StatusCode::OK).await?;
        let group_id = res.json::<GroupIdBody>().await?.groupid;

        self.session.set_group(Some(group_id.clone())).await;
        tracing::info!(group_id = %group_id, game_id, "Group created");
        Ok(group_id)
    }

    /// The group we belong to, if any
    pub async fn my_group(&self) -> Result<Option<Payload>> {
        let res = self
            .send("my group", Method::GET, self.url("v1/groups/")?, None)
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = expect_status(res, StatusCode::OK).await?;
        Ok(Some(res.json().await?))
    }

    /// Invite a user into our group by name
    pub async fn invite(&self, name: &str) -> Result<()> {
        let mut url = self.url("v1/groups/invite/byname/")?;
        url.path_segments_mut()
            .map_err(|_| FeedError::Config(format!("Base URL cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .push(name);

        let res = self.send("invite", Method::POST, url, None).await?;
        expect_status(res, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    pub async fn join_group(&self, group_id: &Id) -> Result<()> {
        let url = self.url(&format!("v1/groups/join/{}", group_id))?;
        let res = self.send("join group", Method::POST, url, None).await?;
        expect_status(res, StatusCode::NO_CONTENT).await?;

        self.session.set_group(Some(group_id.clone())).await;
        tracing::info!(group_id = %group_id, "Joined group");
        Ok(())
    }

    pub async fn mark_ready(&self) -> Result<()> {
        self.send_no_content("ready", Method::POST, "v1/groups/ready")
            .await
    }

    pub async fn mark_not_ready(&self) -> Result<()> {
        self.send_no_content("not ready", Method::DELETE, "v1/groups/ready")
            .await
    }

    pub async fn leave_group(&self) -> Result<()> {
        self.send_no_content("leave group", Method::DELETE, "v1/groups/leave")
            .await?;
        self.session.set_group(None).await;
        Ok(())
    }

    pub async fn start_group(&self) -> Result<()> {
        self.send_no_content("start", Method::POST, "v1/groups/start")
            .await
    }

    // ─── Plumbing ───

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FeedError::Config(format!("Invalid API path '{}': {}", path, e)))
    }

    fn http(&self) -> Result<reqwest::Client> {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FeedError::Closed)
    }

    /// Build a request carrying the session token, if any
    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let mut request = self.http()?.request(method, url);
        if let Some(token) = self.session.token().await {
            request = request.header(AUTHORIZATION, format!("{} {}", AUTHORIZATION_SCHEME, token));
        }
        Ok(request)
    }

    /// Send an action request, retrying failed connection attempts
    async fn send(
        &self,
        label: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response> {
        with_retry(&self.retry, label, move || {
            self.send_once(label, method.clone(), url.clone(), body, self.request_timeout)
        })
        .await
    }

    async fn send_once(
        &self,
        label: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Response> {
        tracing::debug!(request = label, %method, %url, "Sending request");
        let mut request = self.request(method, url).await?.timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn send_no_content(&self, label: &str, method: Method, path: &str) -> Result<()> {
        let res = self.send(label, method, self.url(path)?, None).await?;
        expect_status(res, StatusCode::NO_CONTENT).await?;
        Ok(())
    }
}

/// Pass the response through if it has the expected status
async fn expect_status(res: Response, expected: StatusCode) -> Result<Response> {
    if res.status() == expected {
        Ok(res)
    } else {
        Err(api_error(res).await)
    }
}

/// Turn an unexpected response into `FeedError::Api`
///
/// JSON bodies supply the reason through their `error` field; anything else
/// falls back to the status's reason phrase, with the body logged.
async fn api_error(res: Response) -> FeedError {
    let status = res.status();
    let url = res.url().clone();
    let is_json = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let reason_phrase = status.canonical_reason().unwrap_or("Unknown").to_string();

    let reason = if is_json {
        let body: Value = res.json().await.unwrap_or(Value::Null);
        match body.get("error").and_then(Value::as_str) {
            Some(error) => {
                tracing::error!(%url, status = status.as_u16(), error, "API request failed");
                error.to_string()
            }
            None => {
                tracing::error!(%url, status = status.as_u16(), body = %body, "API request failed");
                reason_phrase
            }
        }
    } else {
        let body = res.text().await.unwrap_or_default();
        tracing::error!(%url, status = status.as_u16(), body = %body, "API request failed");
        reason_phrase
    };

    FeedError::Api {
        status: status.as_u16(),
        reason,
    }
}

#[async_trait]
impl Connector for ApiClient {
    async fn open(&self, scope: Scope) -> Result<ByteStream> {
        let url = self.url(&format!("v1/msgqueues/{}", scope))?;
        let res = self.request(Method::GET, url).await?.send().await?;
        let res = expect_status(res, StatusCode::OK).await?;

        Ok(res
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FeedError::Connection(e.to_string())))
            .boxed())
    }
}

#[async_trait]
impl Teardown for ApiClient {
    async fn session_established(&self) -> bool {
        self.session.is_established().await
    }

    async fn end_session(&self) -> Result<()> {
        self.deauthenticate_once().await
    }

    fn release(&self) {
        self.close();
    }
}
