//! `HttpMessageStore` tests against a wiremock messaging service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chrono::{TimeZone, Utc};
use common::secret::SecretString;
use common::types::ConsultationId;
use consult_session::chat::http::{HttpMessageStore, HttpMessageStoreConfig};
use consult_session::chat::{CorrelationId, MessageStore, OutgoingMessage};
use consult_session::config::SessionConfig;
use consult_session::errors::MessagingError;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "bearer-token-abc";

fn store(server: &MockServer) -> HttpMessageStore {
    HttpMessageStore::new(HttpMessageStoreConfig {
        base_url: format!("{}/", server.uri()),
        auth_token: SecretString::from(TOKEN),
        http_timeout: Duration::from_millis(500),
    })
    .unwrap()
}

fn consultation() -> ConsultationId {
    ConsultationId::new("c-42")
}

#[tokio::test]
async fn test_fetch_all_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consultations/c-42/messages"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "m-1",
                "senderId": "2002",
                "senderDisplayName": "Patient",
                "body": "Hello doctor",
                "sentAt": "2026-03-02T09:15:00Z"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let messages = store(&server)
        .fetch_messages(&consultation(), None)
        .await
        .unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m-1");
    assert_eq!(messages[0].sender_id.as_str(), "2002");
    assert!(messages[0].correlation_id.is_none());
}

#[tokio::test]
async fn test_fetch_since_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consultations/c-42/messages"))
        .and(query_param("since", "2026-03-02T09:15:00.250Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap()
        + chrono::Duration::milliseconds(250);
    let messages = store(&server)
        .fetch_messages(&consultation(), Some(since))
        .await
        .unwrap();

    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_post_message_echoes_correlation_id() {
    let server = MockServer::start().await;
    let correlation_id = CorrelationId::new();

    Mock::given(method("POST"))
        .and(path("/consultations/c-42/messages"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_partial_json(json!({
            "body": "See you at 3",
            "correlationId": correlation_id.to_string()
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "m-7",
            "senderId": "1001",
            "senderDisplayName": "Dr. Test",
            "body": "See you at 3",
            "sentAt": "2026-03-02T09:16:00Z",
            "correlationId": correlation_id.to_string()
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stored = store(&server)
        .post_message(
            &consultation(),
            &OutgoingMessage {
                body: "See you at 3".to_string(),
                correlation_id,
            },
        )
        .await
        .unwrap();

    assert_eq!(stored.id, "m-7");
    assert_eq!(stored.correlation_id, Some(correlation_id));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = store(&server)
        .fetch_messages(&consultation(), None)
        .await
        .unwrap_err();
    assert_eq!(err, MessagingError::Status { status: 401 });
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = store(&server)
        .post_message(
            &consultation(),
            &OutgoingMessage {
                body: "hi".to_string(),
                correlation_id: CorrelationId::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_slow_service_times_out_as_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = store(&server)
        .fetch_messages(&consultation(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::Transport(_)));
}

#[tokio::test]
async fn test_store_from_session_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/consultations/c-42/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let vars = HashMap::from([("CONSULT_MESSAGING_URL".to_string(), server.uri())]);
    let config = SessionConfig::from_vars(&vars).unwrap();
    let store_config = config
        .http_message_store(SecretString::from(TOKEN))
        .unwrap();

    let store = HttpMessageStore::new(store_config).unwrap();
    store.fetch_messages(&consultation(), None).await.unwrap();
}
