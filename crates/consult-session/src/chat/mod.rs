//! Consultation chat: the messaging collaborator contract, the chat log, and
//! the polling synchronizer.
//!
//! Outgoing messages carry a client-generated [`CorrelationId`]. The log shows
//! them immediately as [`DeliveryStatus::Pending`] entries and replaces them
//! in place once the store confirms, either through the send response or
//! through a poll that returns the authoritative copy first.

pub mod http;
mod log;
mod synchronizer;

pub use log::ChatLog;
pub use synchronizer::{ChatSyncHandle, ChatSynchronizer};

use crate::errors::MessagingError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConsultationId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Client-generated id used only to reconcile an optimistic entry with its
/// authoritative copy. Discarded once the entry is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An authoritative message as returned by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id.
    pub id: String,
    /// Author.
    pub sender_id: ParticipantId,
    /// Author's display name.
    pub sender_display_name: String,
    /// Message text.
    pub body: String,
    /// Authoritative server timestamp.
    pub sent_at: DateTime<Utc>,
    /// Echo of the correlation id the sender attached, if the store keeps it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// Body of a message post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Message text.
    pub body: String,
    /// Correlation id for reconciliation.
    pub correlation_id: CorrelationId,
}

/// Delivery state of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Optimistic, send in flight.
    Pending,
    /// Authoritative copy from the store.
    Confirmed,
    /// Send failed; eligible for retry.
    Failed,
}

/// Identity of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageId {
    /// Assigned by the message store.
    Server(String),
    /// Temporary id of an optimistic entry.
    Pending(CorrelationId),
}

/// One entry of the chat log as exposed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    /// Server id once confirmed, temporary id before.
    pub id: MessageId,
    /// Author.
    pub sender_id: ParticipantId,
    /// Author's display name.
    pub sender_display_name: String,
    /// Message text.
    pub body: String,
    /// Server timestamp once confirmed, local clock before.
    pub sent_at: DateTime<Utc>,
    /// Present while the entry is not confirmed.
    pub correlation_id: Option<CorrelationId>,
    /// Delivery state.
    pub status: DeliveryStatus,
}

impl ChatEntry {
    fn confirmed(message: ChatMessage) -> Self {
        Self {
            id: MessageId::Server(message.id),
            sender_id: message.sender_id,
            sender_display_name: message.sender_display_name,
            body: message.body,
            sent_at: message.sent_at,
            correlation_id: None,
            status: DeliveryStatus::Confirmed,
        }
    }

    /// Server id, if confirmed.
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        match &self.id {
            MessageId::Server(id) => Some(id),
            MessageId::Pending(_) => None,
        }
    }
}

/// Immutable view of the chat log.
pub type ChatSnapshot = Arc<Vec<ChatEntry>>;

/// The messaging collaborator.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages of the consultation with `sent_at >= since`, or all of them
    /// when `since` is `None`. Stores without cursor support may ignore `since`.
    async fn fetch_messages(
        &self,
        consultation_id: &ConsultationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, MessagingError>;

    /// Persist a message and return the authoritative record.
    async fn post_message(
        &self,
        consultation_id: &ConsultationId,
        message: &OutgoingMessage,
    ) -> Result<ChatMessage, MessagingError>;
}
