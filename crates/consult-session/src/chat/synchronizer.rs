//! Chat Synchronizer actor.
//!
//! One task per connected session. It owns the [`ChatLog`], polls the message
//! store on a fixed interval, and runs message sends concurrently with polls.
//!
//! Cancellation is checked twice per fetch: before dispatching it and again
//! before applying its result, since the fetch may resolve after teardown
//! began. Once the token is cancelled the task aborts in-flight work, fails
//! any pending sends, and publishes the final snapshot.

use super::{ChatLog, ChatMessage, ChatSnapshot, CorrelationId, MessageStore, OutgoingMessage};
use crate::errors::{MessagingError, SessionError};
use crate::observability::metrics;

use chrono::Utc;
use common::types::{ConsultationId, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Chat mailbox capacity.
const CHAT_CHANNEL_BUFFER: usize = 64;

/// Reply channel for sends and retries.
pub(crate) type SendReply = oneshot::Sender<Result<ChatMessage, SessionError>>;

/// Messages handled by the synchronizer.
#[derive(Debug)]
pub(crate) enum ChatCommand {
    /// Send a new message.
    Send { body: String, respond_to: SendReply },
    /// Re-send a failed message.
    Retry {
        correlation_id: CorrelationId,
        respond_to: SendReply,
    },
}

impl ChatCommand {
    fn reject(self, error: SessionError) {
        let respond_to = match self {
            ChatCommand::Send { respond_to, .. } | ChatCommand::Retry { respond_to, .. } => {
                respond_to
            }
        };
        let _ = respond_to.send(Err(error));
    }
}

/// Completed background work.
enum Work {
    Fetch(Result<Vec<ChatMessage>, MessagingError>),
    Post {
        correlation_id: CorrelationId,
        result: Result<ChatMessage, MessagingError>,
    },
}

/// Handle to the synchronizer.
#[derive(Clone)]
pub struct ChatSyncHandle {
    sender: mpsc::Sender<ChatCommand>,
}

impl ChatSyncHandle {
    /// Queue a send. The reply arrives on `respond_to` once the store answers.
    pub(crate) async fn send(&self, body: String, respond_to: SendReply) {
        self.submit(ChatCommand::Send { body, respond_to }).await;
    }

    /// Queue a retry of a failed entry.
    pub(crate) async fn retry(&self, correlation_id: CorrelationId, respond_to: SendReply) {
        self.submit(ChatCommand::Retry {
            correlation_id,
            respond_to,
        })
        .await;
    }

    async fn submit(&self, command: ChatCommand) {
        if let Err(mpsc::error::SendError(command)) = self.sender.send(command).await {
            command.reject(SessionError::Cancelled);
        }
    }

    /// Send a message and wait for the store's answer.
    #[cfg(test)]
    pub(crate) async fn send_message(&self, body: String) -> Result<ChatMessage, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(body, tx).await;
        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }
}

/// The synchronizer task state.
pub struct ChatSynchronizer {
    consultation_id: ConsultationId,
    local_participant_id: ParticipantId,
    local_display_name: String,
    store: Arc<dyn MessageStore>,
    log: ChatLog,
    receiver: mpsc::Receiver<ChatCommand>,
    snapshot_tx: Arc<watch::Sender<ChatSnapshot>>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
    work: JoinSet<Work>,
    fetch_in_flight: bool,
    waiting: HashMap<CorrelationId, SendReply>,
}

impl ChatSynchronizer {
    /// Spawn the synchronizer. The first fetch is dispatched immediately.
    #[must_use]
    pub fn spawn(
        consultation_id: ConsultationId,
        local_participant_id: ParticipantId,
        local_display_name: String,
        store: Arc<dyn MessageStore>,
        snapshot_tx: Arc<watch::Sender<ChatSnapshot>>,
        poll_interval: Duration,
        cancel_token: CancellationToken,
    ) -> (ChatSyncHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHAT_CHANNEL_BUFFER);
        let task = Self {
            consultation_id,
            local_participant_id,
            local_display_name,
            store,
            log: ChatLog::new(),
            receiver,
            snapshot_tx,
            poll_interval,
            cancel_token,
            work: JoinSet::new(),
            fetch_in_flight: false,
            waiting: HashMap::new(),
        };
        let join = tokio::spawn(task.run());
        (ChatSyncHandle { sender }, join)
    }

    #[instrument(skip_all, name = "consult.chat", fields(consultation_id = %self.consultation_id))]
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "consult.chat",
            poll_interval_ms = self.poll_interval.as_millis(),
            "Chat synchronizer started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,

                Some(done) = self.work.join_next(), if !self.work.is_empty() => {
                    self.on_work_done(done);
                }

                _ = ticker.tick() => self.dispatch_fetch(),

                command = self.receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn dispatch_fetch(&mut self) {
        if self.cancel_token.is_cancelled() || self.fetch_in_flight {
            return;
        }
        self.fetch_in_flight = true;

        let store = Arc::clone(&self.store);
        let consultation_id = self.consultation_id.clone();
        let since = self.log.cursor();
        self.work.spawn(async move {
            Work::Fetch(store.fetch_messages(&consultation_id, since).await)
        });
    }

    fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Send { body, respond_to } => {
                let correlation_id = CorrelationId::new();
                self.log.push_optimistic(
                    self.local_participant_id.clone(),
                    self.local_display_name.clone(),
                    body.clone(),
                    correlation_id,
                    Utc::now(),
                );
                self.publish_snapshot();
                self.dispatch_post(correlation_id, body, respond_to);
            }
            ChatCommand::Retry {
                correlation_id,
                respond_to,
            } => match self.log.begin_retry(correlation_id) {
                Ok(body) => {
                    debug!(target: "consult.chat", correlation_id = %correlation_id, "Retrying chat message");
                    self.publish_snapshot();
                    self.dispatch_post(correlation_id, body, respond_to);
                }
                Err(e) => {
                    let _ = respond_to.send(Err(e));
                }
            },
        }
    }

    fn dispatch_post(&mut self, correlation_id: CorrelationId, body: String, respond_to: SendReply) {
        self.waiting.insert(correlation_id, respond_to);

        let store = Arc::clone(&self.store);
        let consultation_id = self.consultation_id.clone();
        let message = OutgoingMessage {
            body,
            correlation_id,
        };
        self.work.spawn(async move {
            Work::Post {
                correlation_id,
                result: store.post_message(&consultation_id, &message).await,
            }
        });
    }

    fn on_work_done(&mut self, done: Result<Work, JoinError>) {
        match done {
            Ok(Work::Fetch(result)) => self.apply_fetch(result),
            Ok(Work::Post {
                correlation_id,
                result,
            }) => self.apply_post(correlation_id, result),
            Err(e) => {
                warn!(target: "consult.chat", error = %e, "Chat work task failed");
            }
        }
    }

    fn apply_fetch(&mut self, result: Result<Vec<ChatMessage>, MessagingError>) {
        self.fetch_in_flight = false;

        if self.cancel_token.is_cancelled() {
            metrics::record_chat_poll("discarded");
            return;
        }

        match result {
            Ok(batch) => {
                metrics::record_chat_poll("success");
                let changed = self.log.merge(batch);
                if changed > 0 {
                    debug!(target: "consult.chat", changed, total = self.log.len(), "Merged fetched messages");
                    self.publish_snapshot();
                }
            }
            Err(e) => {
                metrics::record_chat_poll("error");
                warn!(target: "consult.chat", error = %e, "Chat fetch failed");
            }
        }
    }

    fn apply_post(&mut self, correlation_id: CorrelationId, result: Result<ChatMessage, MessagingError>) {
        let reply = match result {
            Ok(message) => {
                metrics::record_chat_send("success");
                self.log.confirm(correlation_id, message.clone());
                Ok(message)
            }
            Err(source) => {
                metrics::record_chat_send("error");
                warn!(
                    target: "consult.chat",
                    correlation_id = %correlation_id,
                    error = %source,
                    "Chat message send failed"
                );
                self.log.mark_failed(correlation_id);
                Err(SessionError::SendMessage {
                    correlation_id,
                    source,
                })
            }
        };
        self.publish_snapshot();

        if let Some(respond_to) = self.waiting.remove(&correlation_id) {
            let _ = respond_to.send(reply);
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.log.snapshot());
    }

    async fn shutdown(&mut self) {
        self.work.abort_all();
        while self.work.join_next().await.is_some() {}

        let abandoned = self.log.fail_pending();
        for (_, respond_to) in self.waiting.drain() {
            let _ = respond_to.send(Err(SessionError::Cancelled));
        }
        self.receiver.close();
        while let Ok(command) = self.receiver.try_recv() {
            command.reject(SessionError::Cancelled);
        }

        self.publish_snapshot();
        info!(
            target: "consult.chat",
            entries = self.log.len(),
            abandoned,
            "Chat synchronizer stopped"
        );
    }
}
