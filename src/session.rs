//! Client session state
//!
//! One `SessionState` per client, shared through a `SessionHandle`. Every
//! outgoing request reads the token; writes happen only inside guarded
//! actions (login, logout, group changes), which the `ActionSerializer`
//! already keeps to one at a time. Background event handlers may read
//! concurrently with such a write.

use crate::error::{FeedError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Server-assigned identifier, numeric or textual
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Num(i64),
    Text(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Num(n) => write!(f, "{}", n),
            Id::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Num(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Text(s.to_string())
    }
}

/// Who the token belongs to, read from its claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "uid")]
    pub user_id: Id,

    #[serde(rename = "nic")]
    pub nickname: String,

    /// Account type (e.g. player, admin)
    #[serde(rename = "typ")]
    pub kind: String,
}

impl Identity {
    /// Decode the claims segment of a JWT without verifying it
    ///
    /// Verification is the server's job; the client only needs the claims
    /// to show who is logged in.
    pub fn from_token(token: &str) -> Result<Self> {
        let segment = token
            .split('.')
            .nth(1)
            .ok_or_else(|| FeedError::Malformed("token has no claims segment".to_string()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|e| FeedError::Malformed(format!("token claims are not base64: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| FeedError::Malformed(format!("token claims are not valid: {}", e)))
    }
}

/// A game offered by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    #[serde(rename = "gameid")]
    pub id: i64,

    pub name: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Everything the client knows about the logged-in user
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub token: Option<String>,
    pub identity: Option<Identity>,
    pub group_id: Option<Id>,
    pub games: Option<Vec<Game>>,
}

/// Shared handle to the session state
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly issued token and the identity it carries
    pub async fn establish(&self, token: String) -> Result<Identity> {
        let identity = Identity::from_token(&token)?;

        let mut state = self.inner.write().await;
        state.token = Some(token);
        state.identity = Some(identity.clone());

        tracing::info!(
            user_id = %identity.user_id,
            nickname = %identity.nickname,
            "Session established"
        );
        Ok(identity)
    }

    /// Forget the token, identity and group; the game list stays cached
    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.token = None;
        state.identity = None;
        state.group_id = None;
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    pub async fn is_established(&self) -> bool {
        self.inner.read().await.token.is_some()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.read().await.identity.clone()
    }

    pub async fn group_id(&self) -> Option<Id> {
        self.inner.read().await.group_id.clone()
    }

    pub async fn set_group(&self, group_id: Option<Id>) {
        self.inner.write().await.group_id = group_id;
    }

    pub async fn cached_games(&self) -> Option<Vec<Game>> {
        self.inner.read().await.games.clone()
    }

    pub async fn cache_games(&self, games: Vec<Game>) {
        self.inner.write().await.games = Some(games);
    }

    /// Copy of the whole state
    pub async fn snapshot(&self) -> SessionState {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
pub(crate) fn test_token(uid: i64, nickname: &str) -> String {
    let claims = serde_json::json!({"uid": uid, "nic": nickname, "typ": "player"});
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.signature",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_token() {
        let identity = Identity::from_token(&test_token(42, "alice")).unwrap();
        assert_eq!(identity.user_id, Id::Num(42));
        assert_eq!(identity.nickname, "alice");
        assert_eq!(identity.kind, "player");
    }

    #[test]
    fn test_identity_accepts_padded_segment() {
        let claims = base64::engine::general_purpose::URL_SAFE
            .encode(br#"{"uid":"u-1","nic":"bo","typ":"admin"}"#);
        assert!(claims.ends_with('='));

        let identity = Identity::from_token(&format!("h.{}.s", claims)).unwrap();
        assert_eq!(identity.user_id, Id::Text("u-1".into()));
        assert_eq!(identity.kind, "admin");
    }

    #[test]
    fn test_identity_rejects_bad_tokens() {
        assert!(matches!(
            Identity::from_token("not-a-jwt"),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            Identity::from_token("h.!!!.s"),
            Err(FeedError::Malformed(_))
        ));
        let not_claims = URL_SAFE_NO_PAD.encode(b"[1,2]");
        assert!(matches!(
            Identity::from_token(&format!("h.{}.s", not_claims)),
            Err(FeedError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let session = SessionHandle::new();
        assert!(!session.is_established().await);

        let identity = session.establish(test_token(7, "al")).await.unwrap();
        assert_eq!(identity.nickname, "al");
        assert!(session.is_established().await);
        assert_eq!(session.identity().await.unwrap().user_id, Id::Num(7));

        session.set_group(Some(Id::Num(3))).await;
        session
            .cache_games(vec![Game {
                id: 1,
                name: "Tic-tac-toe".into(),
                extra: Default::default(),
            }])
            .await;

        session.clear().await;
        let state = session.snapshot().await;
        assert!(state.token.is_none());
        assert!(state.identity.is_none());
        assert!(state.group_id.is_none());
        assert_eq!(state.games.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_establish_with_bad_token_keeps_state() {
        let session = SessionHandle::new();
        assert!(session.establish("garbage".into()).await.is_err());
        assert!(session.token().await.is_none());
    }

    #[test]
    fn test_game_keeps_extra_fields() {
        let game: Game = serde_json::from_value(serde_json::json!({
            "gameid": 2,
            "name": "Chess",
            "capacity": 2
        }))
        .unwrap();
        assert_eq!(game.id, 2);
        assert_eq!(game.extra["capacity"], 2);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(Id::Num(5).to_string(), "5");
        assert_eq!(Id::from("abc").to_string(), "abc");
    }
}
