//! Mailbox messages and snapshot types for the session actor.

use crate::chat::{ChatMessage, CorrelationId};
use crate::errors::{FailureReason, SessionError};
use crate::media::{MediaConfig, TrackKind};
use crate::state::{SessionState, SourceMode};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Clears the screen-share in-flight flag when dropped.
#[derive(Debug)]
pub(super) struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    pub(super) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Messages sent to the session actor.
#[derive(Debug)]
pub(super) enum SessionMessage {
    /// Run the start sequence.
    Start {
        media: MediaConfig,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Flip the muted flag of the local track of `kind`.
    ToggleMute {
        kind: TrackKind,
        /// Response channel with the new muted value.
        respond_to: oneshot::Sender<Result<bool, SessionError>>,
    },

    /// Swap the video-class track between camera and screen.
    ToggleScreenShare {
        /// Dropped by the actor after it replies.
        in_flight: InFlightGuard,
        /// Response channel with the new source mode.
        respond_to: oneshot::Sender<Result<SourceMode, SessionError>>,
    },

    /// Send a chat message. The reply arrives once the store answers.
    SendChat {
        body: String,
        respond_to: oneshot::Sender<Result<ChatMessage, SessionError>>,
    },

    /// Re-send a failed chat message.
    RetryChat {
        correlation_id: CorrelationId,
        respond_to: oneshot::Sender<Result<ChatMessage, SessionError>>,
    },

    /// Run teardown and end the session.
    Leave {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Terminal error shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    /// Device/permission versus network/engine.
    pub reason: FailureReason,
    /// User-safe message.
    pub message: String,
    /// Last state before the failure.
    pub state_at_failure: SessionState,
}

/// Read-only view of the session for UI binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Microphone muted.
    pub audio_muted: bool,
    /// Camera or screen muted.
    pub video_muted: bool,
    /// Source feeding the video-class track.
    pub source_mode: SourceMode,
    /// Set once the session reaches `Failed`.
    pub failure: Option<SessionFailure>,
}

impl SessionSnapshot {
    pub(super) fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            audio_muted: false,
            video_muted: false,
            source_mode: SourceMode::Camera,
            failure: None,
        }
    }
}
