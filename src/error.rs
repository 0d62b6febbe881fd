//! Error types for a3s-feed

use crate::types::Scope;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the feed client
#[derive(Debug, Error)]
pub enum FeedError {
    /// The connection could not be established (refused, DNS, connect timeout)
    ///
    /// Transient: retried with backoff.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request was sent but no response arrived in time
    ///
    /// Not retried: the server may already have acted on it.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The stream produced no bytes for longer than the idle timeout
    ///
    /// Transient: treated like a dropped connection.
    #[error("Stream stalled: no data received for {0:?}")]
    Stalled(Duration),

    /// A delimited segment was not a valid message
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Non-success status returned by an API endpoint
    #[error("API error {status}: {reason}")]
    Api {
        status: u16,
        reason: String,
    },

    /// Cooperative cancellation was observed
    #[error("Operation cancelled")]
    Cancelled,

    /// A subscription exhausted its connection attempts
    #[error("Subscription to scope '{scope}' gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        scope: Scope,
        attempts: u32,
        last: Box<FeedError>,
    },

    /// HTTP client failure that is not a connectivity problem
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared connection pool has been released
    #[error("Client is closed")]
    Closed,
}

impl FeedError {
    /// Whether the retry layer may try again after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Stalled(_))
    }

    /// Whether this is an API error with a server-side (5xx) status
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connection(e.to_string())
        } else if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::Connection("refused".into()).is_transient());
        assert!(FeedError::Stalled(Duration::from_secs(65)).is_transient());

        assert!(!FeedError::Malformed("x".into()).is_transient());
        assert!(!FeedError::Cancelled.is_transient());
        assert!(!FeedError::Timeout("operation timed out".into()).is_transient());
        assert!(!FeedError::Closed.is_transient());
        assert!(!FeedError::Api {
            status: 503,
            reason: "down".into()
        }
        .is_transient());
    }

    #[test]
    fn test_server_error_classification() {
        let server = FeedError::Api {
            status: 500,
            reason: "boom".into(),
        };
        let client = FeedError::Api {
            status: 404,
            reason: "no such group".into(),
        };
        assert!(server.is_server_error());
        assert!(!client.is_server_error());
        assert!(!FeedError::Connection("x".into()).is_server_error());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = FeedError::RetriesExhausted {
            scope: Scope::Group,
            attempts: 3,
            last: Box::new(FeedError::Connection("refused".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("'group'"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("refused"));
    }
}
