//! HTTP client for the consultation messaging service.
//!
//! - `GET  {base}/consultations/{id}/messages[?since=RFC3339]`
//! - `POST {base}/consultations/{id}/messages`
//!
//! Both requests carry the session's auth token as a bearer token and are
//! bounded by the configured HTTP timeout. The client never retries; a failed
//! poll is simply retried by the next tick, and a failed send is retried only
//! when the user asks for it.

use super::{ChatMessage, MessageStore, OutgoingMessage};
use crate::errors::MessagingError;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::ConsultationId;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Connect timeout for the messaging service.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`HttpMessageStore`].
#[derive(Debug, Clone)]
pub struct HttpMessageStoreConfig {
    /// Base URL of the messaging API (e.g. `https://api.example.org/v1`).
    pub base_url: String,
    /// Bearer token presented on every request.
    pub auth_token: SecretString,
    /// Total request timeout.
    pub http_timeout: Duration,
}

/// [`MessageStore`] over HTTP.
#[derive(Clone)]
pub struct HttpMessageStore {
    client: Client,
    base_url: String,
    auth_token: SecretString,
}

impl HttpMessageStore {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Transport` if the HTTP client cannot be built.
    pub fn new(config: HttpMessageStoreConfig) -> Result<Self, MessagingError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                error!(target: "consult.chat", error = %e, "Failed to build HTTP client");
                MessagingError::Transport(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
        })
    }

    fn messages_url(&self, consultation_id: &ConsultationId) -> String {
        format!(
            "{}/consultations/{}/messages",
            self.base_url,
            consultation_id.as_str()
        )
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MessagingError> {
        let status = response.status();
        if !status.is_success() {
            warn!(target: "consult.chat", status = %status, "Messaging service returned error status");
            return Err(MessagingError::Status {
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| {
            warn!(target: "consult.chat", error = %e, "Failed to parse messaging response");
            MessagingError::InvalidResponse(e.to_string())
        })
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    #[instrument(skip_all, fields(consultation_id = %consultation_id))]
    async fn fetch_messages(
        &self,
        consultation_id: &ConsultationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, MessagingError> {
        let mut request = self
            .client
            .get(self.messages_url(consultation_id))
            .bearer_auth(self.auth_token.expose_secret());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "consult.chat", error = %e, "Message fetch request failed");
            MessagingError::Transport(e.to_string())
        })?;

        Self::read_json(response).await
    }

    #[instrument(skip_all, fields(consultation_id = %consultation_id, correlation_id = %message.correlation_id))]
    async fn post_message(
        &self,
        consultation_id: &ConsultationId,
        message: &OutgoingMessage,
    ) -> Result<ChatMessage, MessagingError> {
        let response = self
            .client
            .post(self.messages_url(consultation_id))
            .bearer_auth(self.auth_token.expose_secret())
            .json(message)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "consult.chat", error = %e, "Message post request failed");
                MessagingError::Transport(e.to_string())
            })?;

        Self::read_json(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let store = HttpMessageStore::new(HttpMessageStoreConfig {
            base_url: "http://localhost:9000/api/".to_string(),
            auth_token: SecretString::from("t"),
            http_timeout: Duration::from_secs(1),
        })
        .unwrap();

        assert_eq!(
            store.messages_url(&ConsultationId::new("c-42")),
            "http://localhost:9000/api/consultations/c-42/messages"
        );
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = HttpMessageStoreConfig {
            base_url: "http://localhost".to_string(),
            auth_token: SecretString::from("bearer-secret-123"),
            http_timeout: Duration::from_secs(1),
        };

        assert!(!format!("{config:?}").contains("bearer-secret-123"));
    }
}
