//! `SessionHandle` - the public entry contract of a consultation session.

use super::actor::SessionActor;
use super::messages::{InFlightGuard, SessionMessage, SessionSnapshot};
use super::{SessionDeps, SessionIdentity};
use crate::chat::{ChatMessage, ChatSnapshot, CorrelationId};
use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::media::{MediaConfig, TrackKind};
use crate::observability::metrics;
use crate::registry::ParticipantsSnapshot;
use crate::state::{SessionState, SourceMode};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Session mailbox capacity.
const SESSION_CHANNEL_BUFFER: usize = 32;

/// Handle to a consultation session.
///
/// Cheap to clone. When the last clone is dropped the session tears itself
/// down (if it was started) and the actor task exits.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    root_token: CancellationToken,
    screen_share_in_flight: Arc<AtomicBool>,
    state_rx: watch::Receiver<SessionSnapshot>,
    participants_rx: watch::Receiver<ParticipantsSnapshot>,
    chat_rx: watch::Receiver<ChatSnapshot>,
}

impl SessionHandle {
    /// Create a session in `Idle` and spawn its actor.
    ///
    /// Nothing is acquired until [`Self::start`] is called.
    #[must_use]
    pub fn spawn(
        identity: SessionIdentity,
        deps: SessionDeps,
        config: SessionConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let root_token = CancellationToken::new();

        let (state_tx, state_rx) = watch::channel(SessionSnapshot::idle());
        let (participants_tx, participants_rx) = watch::channel(ParticipantsSnapshot::default());
        let (chat_tx, chat_rx) = watch::channel(ChatSnapshot::default());

        let actor = SessionActor::new(
            identity,
            deps,
            config,
            receiver,
            root_token.clone(),
            state_tx,
            Arc::new(participants_tx),
            Arc::new(chat_tx),
        );
        let join = tokio::spawn(actor.run());

        let handle = Self {
            sender,
            root_token,
            screen_share_in_flight: Arc::new(AtomicBool::new(false)),
            state_rx,
            participants_rx,
            chat_rx,
        };
        (handle, join)
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Run the start sequence. Valid only from `Idle`.
    ///
    /// Returns once the session is `Connected`, or with the error that moved
    /// it to `Failed`. Returns `Cancelled` if `leave()` interrupted it.
    pub async fn start(&self, media: MediaConfig) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::Start { media, respond_to })
            .await
    }

    /// Flip the microphone muted flag; returns the new value.
    pub async fn toggle_audio_mute(&self) -> Result<bool, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleMute {
            kind: TrackKind::Audio,
            respond_to,
        })
        .await
    }

    /// Flip the camera (or screen) muted flag; returns the new value.
    pub async fn toggle_video_mute(&self) -> Result<bool, SessionError> {
        self.request(|respond_to| SessionMessage::ToggleMute {
            kind: TrackKind::Video,
            respond_to,
        })
        .await
    }

    /// Swap between camera and screen capture; returns the new source mode.
    ///
    /// Rejected with `ScreenShareInFlight` while another toggle is still
    /// resolving. Rejected toggles are not queued.
    pub async fn toggle_screen_share(&self) -> Result<SourceMode, SessionError> {
        let Some(in_flight) = InFlightGuard::try_acquire(&self.screen_share_in_flight) else {
            metrics::record_screen_share_toggle("rejected");
            return Err(SessionError::ScreenShareInFlight);
        };

        // The guard travels with the message so the flag stays set until the
        // actor has replied, even if this future is dropped.
        self.request(|respond_to| SessionMessage::ToggleScreenShare {
            in_flight,
            respond_to,
        })
        .await
    }

    /// Send a chat message.
    ///
    /// The optimistic entry is visible in [`Self::watch_chat`] before this
    /// returns. On failure the entry stays in the log marked failed and the
    /// error carries its correlation id for [`Self::retry_chat_message`].
    pub async fn send_chat_message(&self, body: impl Into<String>) -> Result<ChatMessage, SessionError> {
        let body = body.into();
        self.request(|respond_to| SessionMessage::SendChat { body, respond_to })
            .await
    }

    /// Re-send a failed chat message in place.
    pub async fn retry_chat_message(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<ChatMessage, SessionError> {
        self.request(|respond_to| SessionMessage::RetryChat {
            correlation_id,
            respond_to,
        })
        .await
    }

    /// End the session.
    ///
    /// Cancels the session token immediately so an in-progress start stops at
    /// the next step, then waits for teardown. No-op once the session is
    /// `Ended` or `Failed`.
    pub async fn leave(&self) -> Result<(), SessionError> {
        if self.state().is_active() {
            self.root_token.cancel();
        }
        self.request(|respond_to| SessionMessage::Leave { respond_to })
            .await
    }

    /// Current session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().state
    }

    /// Current remote participants.
    #[must_use]
    pub fn participants(&self) -> ParticipantsSnapshot {
        self.participants_rx.borrow().clone()
    }

    /// Current chat log.
    #[must_use]
    pub fn chat(&self) -> ChatSnapshot {
        self.chat_rx.borrow().clone()
    }

    /// Subscribe to session snapshots.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    /// Subscribe to remote participant snapshots.
    #[must_use]
    pub fn watch_participants(&self) -> watch::Receiver<ParticipantsSnapshot> {
        self.participants_rx.clone()
    }

    /// Subscribe to chat snapshots.
    #[must_use]
    pub fn watch_chat(&self) -> watch::Receiver<ChatSnapshot> {
        self.chat_rx.clone()
    }
}
