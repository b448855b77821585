//! Fake message store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::types::{ConsultationId, ParticipantId};
use consult_session::chat::{ChatMessage, MessageStore, OutgoingMessage};
use consult_session::errors::MessagingError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::fixtures::{LOCAL_DISPLAY_NAME, LOCAL_PARTICIPANT_ID};
use crate::gate::Gate;

/// In-memory message store for one consultation.
///
/// Accepted posts are appended to the server-side log before the post
/// response is released, so a poll that runs while a post is held sees the
/// authoritative copy first. Timestamps advance one second per message from a
/// fixed origin.
pub struct FakeMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    sender_id: ParticipantId,
    sender_display_name: String,
    post_error: Mutex<Option<MessagingError>>,
    fetch_error: Mutex<Option<MessagingError>>,
    cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    ignore_cursor: AtomicBool,
    fetches: AtomicUsize,
    posts: AtomicUsize,
    fetch_gate: Gate,
    post_gate: Gate,
}

impl Default for FakeMessageStore {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            sender_id: ParticipantId::new(LOCAL_PARTICIPANT_ID),
            sender_display_name: LOCAL_DISPLAY_NAME.to_string(),
            post_error: Mutex::new(None),
            fetch_error: Mutex::new(None),
            cursors: Mutex::new(Vec::new()),
            ignore_cursor: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
            fetch_gate: Gate::default(),
            post_gate: Gate::default(),
        }
    }
}

impl FakeMessageStore {
    /// Create an empty store that attributes posts to the local fixture participant.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a message from another participant to the server-side log.
    pub fn insert_remote_message(&self, sender_id: &str, body: &str) -> ChatMessage {
        let mut messages = self.messages.lock().unwrap();
        let message = ChatMessage {
            id: format!("srv-{}", messages.len() + 1),
            sender_id: ParticipantId::new(sender_id),
            sender_display_name: format!("Participant {sender_id}"),
            body: body.to_string(),
            sent_at: timestamp(messages.len()),
            correlation_id: None,
        };
        messages.push(message.clone());
        message
    }

    /// Make every post fail with `error` (nothing is stored).
    pub fn fail_posts(&self, error: MessagingError) {
        *self.post_error.lock().unwrap() = Some(error);
    }

    /// Let posts succeed again.
    pub fn succeed_posts(&self) {
        *self.post_error.lock().unwrap() = None;
    }

    /// Make every fetch fail with `error`.
    pub fn fail_fetches(&self, error: MessagingError) {
        *self.fetch_error.lock().unwrap() = Some(error);
    }

    /// Return the whole log on every fetch regardless of `since`.
    pub fn ignore_cursor(&self, ignore: bool) {
        self.ignore_cursor.store(ignore, Ordering::SeqCst);
    }

    /// Park fetches until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        self.fetch_gate.close();
    }

    /// Let parked fetches proceed.
    pub fn release_fetches(&self) {
        self.fetch_gate.open();
    }

    /// Park post responses until [`Self::release_posts`]. The message is
    /// stored before the post parks.
    pub fn hold_posts(&self) {
        self.post_gate.close();
    }

    /// Let parked post responses proceed.
    pub fn release_posts(&self) {
        self.post_gate.open();
    }

    /// Fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Posts received so far, including failed ones.
    pub fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    /// `since` argument of every fetch, in order.
    pub fn cursors_seen(&self) -> Vec<Option<DateTime<Utc>>> {
        self.cursors.lock().unwrap().clone()
    }

    /// Server-side log.
    pub fn stored_messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
}

fn timestamp(index: usize) -> DateTime<Utc> {
    let origin = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    origin + Duration::seconds(i64::try_from(index).unwrap())
}

#[async_trait]
impl MessageStore for FakeMessageStore {
    async fn fetch_messages(
        &self,
        _consultation_id: &ConsultationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, MessagingError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().unwrap().push(since);
        self.fetch_gate.pass().await;

        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }

        let ignore_cursor = self.ignore_cursor.load(Ordering::SeqCst);
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| ignore_cursor || since.map_or(true, |since| m.sent_at >= since))
            .cloned()
            .collect())
    }

    async fn post_message(
        &self,
        _consultation_id: &ConsultationId,
        message: &OutgoingMessage,
    ) -> Result<ChatMessage, MessagingError> {
        self.posts.fetch_add(1, Ordering::SeqCst);

        let post_error = self.post_error.lock().unwrap().clone();
        if let Some(error) = post_error {
            self.post_gate.pass().await;
            return Err(error);
        }

        let stored = {
            let mut messages = self.messages.lock().unwrap();
            let stored = ChatMessage {
                id: format!("srv-{}", messages.len() + 1),
                sender_id: self.sender_id.clone(),
                sender_display_name: self.sender_display_name.clone(),
                body: message.body.clone(),
                sent_at: timestamp(messages.len()),
                correlation_id: Some(message.correlation_id),
            };
            messages.push(stored.clone());
            stored
        };

        self.post_gate.pass().await;
        Ok(stored)
    }
}
