use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};
use crate::retry::RetryConfig;

/// Environment variable overriding `api_url`
pub const ENV_API_URL: &str = "A3S_FEED_API_URL";
/// Environment variable overriding `log_level`
pub const ENV_LOG_LEVEL: &str = "A3S_FEED_LOG_LEVEL";

/// User-configurable settings for the feed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the game server API (default: http://127.0.0.1:8080/)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Log filter directive used by the binary (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds a stream may stay silent before it counts as stalled (default: 65)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Timeout for action requests in seconds; streams have none (default: 300)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Backoff policy for transient connectivity failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    65
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            log_level: default_log_level(),
            idle_timeout_secs: default_idle_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                FeedError::Config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FeedError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API base URL, normalized to end with `/` so relative paths join under it.
    pub fn base_url(&self) -> Result<reqwest::Url> {
        let mut raw = self.api_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        reqwest::Url::parse(&raw)
            .map_err(|e| FeedError::Config(format!("Invalid api_url '{}': {}", self.api_url, e)))
    }
}
