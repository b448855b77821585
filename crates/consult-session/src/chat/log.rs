//! Append-only chat log with optimistic entries.

use super::{ChatEntry, ChatMessage, ChatSnapshot, CorrelationId, DeliveryStatus, MessageId};
use crate::errors::SessionError;

use chrono::{DateTime, Utc};
use common::types::ParticipantId;
use std::collections::HashSet;
use std::sync::Arc;

/// The chat log of one session.
///
/// Never holds two entries with the same server id. Optimistic entries are
/// replaced in place by their authoritative copy, never duplicated.
///
/// Entries are only appended, with one exception for stores that do not echo
/// the correlation id: if a poll delivers the authoritative copy of a local
/// send before the send itself resolves, the copy was appended as a remote
/// message and the optimistic entry is removed when the send confirms. The log
/// shrinks by one in that case.
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
    server_ids: HashSet<String>,
    cursor: Option<DateTime<Utc>>,
}

impl ChatLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in display order.
    #[must_use]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Latest `sent_at` among fetched messages; the next fetch asks for messages since then.
    ///
    /// Only fetched batches move it. A confirmed send says nothing about what
    /// else was stored before it.
    #[must_use]
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    /// Immutable snapshot for readers.
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        Arc::new(self.entries.clone())
    }

    /// Append an optimistic entry for a message being sent.
    pub fn push_optimistic(
        &mut self,
        sender_id: ParticipantId,
        sender_display_name: String,
        body: String,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) {
        self.entries.push(ChatEntry {
            id: MessageId::Pending(correlation_id),
            sender_id,
            sender_display_name,
            body,
            sent_at: now,
            correlation_id: Some(correlation_id),
            status: DeliveryStatus::Pending,
        });
    }

    fn position_unconfirmed(&self, correlation_id: CorrelationId) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.status != DeliveryStatus::Confirmed && e.id == MessageId::Pending(correlation_id)
        })
    }

    fn advance_cursor(&mut self, sent_at: DateTime<Utc>) {
        if self.cursor.map_or(true, |c| sent_at > c) {
            self.cursor = Some(sent_at);
        }
    }

    /// The store accepted the message sent under `correlation_id`.
    pub fn confirm(&mut self, correlation_id: CorrelationId, message: ChatMessage) {
        let already_known = self.server_ids.contains(&message.id);
        let position = self.position_unconfirmed(correlation_id);

        match (position, already_known) {
            // A poll delivered the authoritative copy first without the correlation echo.
            (Some(index), true) => {
                self.entries.remove(index);
            }
            (Some(index), false) => {
                self.server_ids.insert(message.id.clone());
                if let Some(entry) = self.entries.get_mut(index) {
                    *entry = ChatEntry::confirmed(message);
                }
            }
            (None, true) => {}
            (None, false) => {
                self.server_ids.insert(message.id.clone());
                self.entries.push(ChatEntry::confirmed(message));
            }
        }
    }

    /// Mark a pending entry as failed. Returns false if no pending entry matches.
    pub fn mark_failed(&mut self, correlation_id: CorrelationId) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.status == DeliveryStatus::Pending && e.id == MessageId::Pending(correlation_id))
        {
            Some(entry) => {
                entry.status = DeliveryStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Move a failed entry back to pending and return its body for resending.
    pub fn begin_retry(&mut self, correlation_id: CorrelationId) -> Result<String, SessionError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.status == DeliveryStatus::Failed && e.id == MessageId::Pending(correlation_id))
            .ok_or(SessionError::NotRetryable(correlation_id))?;
        entry.status = DeliveryStatus::Pending;
        Ok(entry.body.clone())
    }

    /// Mark every pending entry failed (sends abandoned at teardown).
    pub fn fail_pending(&mut self) -> usize {
        let mut count = 0;
        for entry in &mut self.entries {
            if entry.status == DeliveryStatus::Pending {
                entry.status = DeliveryStatus::Failed;
                count += 1;
            }
        }
        count
    }

    /// Merge a fetched batch. Returns how many entries were added or reconciled.
    pub fn merge(&mut self, batch: Vec<ChatMessage>) -> usize {
        let mut changed = 0;
        for message in batch {
            self.advance_cursor(message.sent_at);
            if self.server_ids.contains(&message.id) {
                continue;
            }
            self.server_ids.insert(message.id.clone());
            changed += 1;

            let reconciled = message
                .correlation_id
                .and_then(|cid| self.position_unconfirmed(cid));
            match reconciled.and_then(|index| self.entries.get_mut(index)) {
                Some(entry) => *entry = ChatEntry::confirmed(message),
                None => self.entries.push(ChatEntry::confirmed(message)),
            }
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_000_000 + secs, 0).unwrap()
    }

    fn server(id: &str, body: &str, secs: i64, correlation_id: Option<CorrelationId>) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            sender_id: ParticipantId::from("2002"),
            sender_display_name: "Patient".to_string(),
            body: body.to_string(),
            sent_at: at(secs),
            correlation_id,
        }
    }

    fn push(log: &mut ChatLog, body: &str) -> CorrelationId {
        let cid = CorrelationId::new();
        log.push_optimistic(
            ParticipantId::from("1001"),
            "Dr. Okafor".to_string(),
            body.to_string(),
            cid,
            at(0),
        );
        cid
    }

    #[test]
    fn test_merge_same_batch_twice_does_not_duplicate() {
        let mut log = ChatLog::new();
        let batch = vec![server("m1", "hi", 1, None), server("m2", "there", 2, None)];

        assert_eq!(log.merge(batch.clone()), 2);
        assert_eq!(log.merge(batch), 0);

        assert_eq!(log.len(), 2);
        assert_eq!(log.cursor(), Some(at(2)));
    }

    #[test]
    fn test_confirm_replaces_optimistic_entry_in_place() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");
        log.merge(vec![server("m1", "earlier", 1, None)]);

        log.confirm(cid, server("m2", "hello", 5, Some(cid)));

        assert_eq!(log.len(), 2);
        let entry = &log.entries()[0];
        assert_eq!(entry.server_id(), Some("m2"));
        assert_eq!(entry.status, DeliveryStatus::Confirmed);
        assert!(entry.correlation_id.is_none());
    }

    #[test]
    fn test_confirm_leaves_cursor_to_fetches() {
        let mut log = ChatLog::new();
        log.merge(vec![server("m1", "earlier", 1, None)]);
        let cid = push(&mut log, "hello");

        log.confirm(cid, server("m2", "hello", 5, Some(cid)));
        assert_eq!(log.cursor(), Some(at(1)));

        // The next fetch returns the confirmed copy again alongside anything stored before it.
        let added = log.merge(vec![
            server("m3", "remote", 3, None),
            server("m2", "hello", 5, Some(cid)),
        ]);
        assert_eq!(added, 1);
        assert_eq!(log.len(), 3);
        assert_eq!(log.cursor(), Some(at(5)));
    }

    #[test]
    fn test_poll_before_send_response_reconciles_by_correlation_id() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");

        log.merge(vec![server("m7", "hello", 3, Some(cid))]);
        log.confirm(cid, server("m7", "hello", 3, Some(cid)));

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].server_id(), Some("m7"));
    }

    #[test]
    fn test_poll_without_correlation_echo_then_confirm_drops_optimistic() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");

        log.merge(vec![server("m7", "hello", 3, None)]);
        assert_eq!(log.len(), 2);

        log.confirm(cid, server("m7", "hello", 3, None));

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].server_id(), Some("m7"));
        assert_eq!(log.entries()[0].status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn test_failed_send_is_kept_and_retryable() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");

        assert!(log.mark_failed(cid));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].status, DeliveryStatus::Failed);

        assert_eq!(log.begin_retry(cid).unwrap(), "hello");
        assert_eq!(log.entries()[0].status, DeliveryStatus::Pending);

        log.confirm(cid, server("m9", "hello", 4, Some(cid)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].server_id(), Some("m9"));
    }

    #[test]
    fn test_retry_rejected_unless_failed() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");

        assert!(matches!(
            log.begin_retry(cid),
            Err(SessionError::NotRetryable(id)) if id == cid
        ));
        assert!(matches!(
            log.begin_retry(CorrelationId::new()),
            Err(SessionError::NotRetryable(_))
        ));
    }

    #[test]
    fn test_failed_entry_reconciled_when_store_persisted_anyway() {
        let mut log = ChatLog::new();
        let cid = push(&mut log, "hello");
        log.mark_failed(cid);

        log.merge(vec![server("m3", "hello", 2, Some(cid))]);

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].status, DeliveryStatus::Confirmed);
        assert!(matches!(log.begin_retry(cid), Err(SessionError::NotRetryable(_))));
    }

    #[test]
    fn test_fail_pending_marks_only_pending() {
        let mut log = ChatLog::new();
        let a = push(&mut log, "a");
        let _b = push(&mut log, "b");
        log.mark_failed(a);
        log.merge(vec![server("m1", "c", 1, None)]);

        assert_eq!(log.fail_pending(), 1);
        assert!(log
            .entries()
            .iter()
            .filter(|e| e.server_id().is_none())
            .all(|e| e.status == DeliveryStatus::Failed));
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let mut log = ChatLog::new();
        log.merge(vec![server("m2", "b", 10, None)]);
        log.merge(vec![server("m1", "a", 4, None)]);

        assert_eq!(log.cursor(), Some(at(10)));
    }
}
