//! Consultation session configuration.
//!
//! Loaded from environment variables by the host application and passed to
//! [`SessionHandle::spawn`](crate::session::SessionHandle::spawn). Every value
//! has a default; only the messaging URL is needed, and only when the host
//! uses [`HttpMessageStore`](crate::chat::http::HttpMessageStore).

use crate::chat::http::HttpMessageStoreConfig;

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default chat polling interval in milliseconds.
pub const DEFAULT_CHAT_POLL_INTERVAL_MS: u64 = 3000;

/// Default bound on waiting for a background task during teardown, in milliseconds.
pub const DEFAULT_TEARDOWN_TASK_TIMEOUT_MS: u64 = 5000;

/// Default messaging HTTP timeout in milliseconds.
pub const DEFAULT_MESSAGING_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed chat polling interval (default: 3s).
    pub chat_poll_interval: Duration,

    /// How long teardown waits for the chat and registry tasks before
    /// aborting them (default: 5s).
    pub teardown_task_timeout: Duration,

    /// Base URL of the messaging API, if configured.
    pub messaging_url: Option<String>,

    /// Request timeout for the messaging API (default: 10s).
    pub messaging_http_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chat_poll_interval: Duration::from_millis(DEFAULT_CHAT_POLL_INTERVAL_MS),
            teardown_task_timeout: Duration::from_millis(DEFAULT_TEARDOWN_TASK_TIMEOUT_MS),
            messaging_url: None,
            messaging_http_timeout: Duration::from_millis(DEFAULT_MESSAGING_HTTP_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional positive millisecond value.
fn parse_millis(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(Duration::from_millis(default));
    };

    let millis: u64 = raw
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw:?}: {e}")))?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
    }
    Ok(Duration::from_millis(millis))
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let chat_poll_interval = parse_millis(
            vars,
            "CONSULT_CHAT_POLL_INTERVAL_MS",
            DEFAULT_CHAT_POLL_INTERVAL_MS,
        )?;

        let teardown_task_timeout = parse_millis(
            vars,
            "CONSULT_TEARDOWN_TASK_TIMEOUT_MS",
            DEFAULT_TEARDOWN_TASK_TIMEOUT_MS,
        )?;

        let messaging_http_timeout = parse_millis(
            vars,
            "CONSULT_MESSAGING_HTTP_TIMEOUT_MS",
            DEFAULT_MESSAGING_HTTP_TIMEOUT_MS,
        )?;

        let messaging_url = match vars.get("CONSULT_MESSAGING_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(url.clone())
            }
            Some(url) => {
                return Err(ConfigError::InvalidValue(format!(
                    "CONSULT_MESSAGING_URL must be an http(s) URL, got {url:?}"
                )))
            }
            None => None,
        };

        Ok(SessionConfig {
            chat_poll_interval,
            teardown_task_timeout,
            messaging_url,
            messaging_http_timeout,
        })
    }

    /// Build the HTTP message store configuration for a session.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no messaging URL is configured.
    pub fn http_message_store(
        &self,
        auth_token: SecretString,
    ) -> Result<HttpMessageStoreConfig, ConfigError> {
        let base_url = self
            .messaging_url
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("CONSULT_MESSAGING_URL".to_string()))?;

        Ok(HttpMessageStoreConfig {
            base_url,
            auth_token,
            http_timeout: self.messaging_http_timeout,
        })
    }
}
