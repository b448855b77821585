//! Consultation session error types.
//!
//! [`SessionError`] is what the public handle returns. The three collaborator
//! error types ([`EngineError`], [`CaptureError`], [`MessagingError`]) are what
//! the media engine, the capture devices, and the message store report; the
//! session wraps them into the variant that says which step failed.
//!
//! Propagation policy:
//! - `Acquisition`, `EngineJoin`, `Publish`: fatal, the session moves to `Failed`
//! - `Subscribe`, `SendMessage`, `Mute`: local, the session keeps running
//! - `Teardown`: logged per step, never returned mid-teardown

use crate::chat::CorrelationId;
use crate::media::TrackKind;
use crate::state::SessionState;
use common::types::ParticipantId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors reported by the external media engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the request (bad token, unknown channel, kicked).
    #[error("Engine rejected request: {0}")]
    Rejected(String),

    /// The request could not reach the engine or timed out.
    #[error("Engine network error: {0}")]
    Network(String),

    /// Any other engine-side failure.
    #[error("Engine failure: {0}")]
    Failure(String),
}

/// Errors reported by the capture devices collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the platform denied access to the device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No such device, or the device is busy.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The user dismissed a source picker (screen capture).
    #[error("Capture cancelled by user")]
    Cancelled,
}

/// Errors reported by the messaging collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    /// Transport failure (connect, timeout, TLS).
    #[error("Messaging transport error: {0}")]
    Transport(String),

    /// The message store answered with a non-success status.
    #[error("Messaging service returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("Invalid messaging response: {0}")]
    InvalidResponse(String),
}

/// Distinguishing reason shown with the single terminal error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Camera, microphone, or screen capture denied or unavailable.
    MediaDevice,
    /// Network, authentication, or media engine rejection.
    Connection,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MediaDevice => f.write_str("media_device"),
            FailureReason::Connection => f.write_str("connection"),
        }
    }
}

/// Consultation session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Local capture could not be acquired.
    #[error("Local media acquisition failed: {0}")]
    Acquisition(CaptureError),

    /// Joining the media engine failed.
    #[error("Engine join failed: {0}")]
    EngineJoin(EngineError),

    /// Publishing or unpublishing local tracks failed.
    #[error("Track publish failed: {0}")]
    Publish(EngineError),

    /// Subscribing to a remote track failed.
    #[error("Subscribe to {kind} of {participant_id} failed: {source}")]
    Subscribe {
        /// Remote participant.
        participant_id: ParticipantId,
        /// Track kind that was requested.
        kind: TrackKind,
        /// Engine error.
        source: EngineError,
    },

    /// Persisting a chat message failed. The entry stays in the log as failed.
    #[error("Chat message {correlation_id} send failed: {source}")]
    SendMessage {
        /// Correlation id of the failed entry, for retry.
        correlation_id: CorrelationId,
        /// Messaging error.
        source: MessagingError,
    },

    /// Flipping the muted flag of a local track failed.
    #[error("Mute of {kind} failed: {source}")]
    Mute {
        /// Track kind.
        kind: TrackKind,
        /// Capture error.
        source: CaptureError,
    },

    /// A teardown step failed.
    #[error("Teardown step {step} failed: {reason}")]
    Teardown {
        /// Teardown step name.
        step: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The operation is not valid in the current state.
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: SessionState,
    },

    /// A screen-share toggle is already in flight.
    #[error("Screen share toggle already in progress")]
    ScreenShareInFlight,

    /// Retry requested for a chat entry that is not in the failed state.
    #[error("Chat message {0} is not eligible for retry")]
    NotRetryable(CorrelationId),

    /// The operation was abandoned because the session is being torn down.
    #[error("Session is leaving")]
    Cancelled,

    /// Internal error (actor channel closed, task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether this error ends the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Acquisition(_) | SessionError::EngineJoin(_) | SessionError::Publish(_)
        )
    }

    /// Terminal reason for fatal errors, `None` for recoverable ones.
    #[must_use]
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SessionError::Acquisition(_) => Some(FailureReason::MediaDevice),
            SessionError::EngineJoin(_) | SessionError::Publish(_) => {
                Some(FailureReason::Connection)
            }
            _ => None,
        }
    }

    /// Returns a user-safe message (no collaborator internals).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Acquisition(CaptureError::PermissionDenied(_)) => {
                "Camera or microphone access was denied".to_string()
            }
            SessionError::Acquisition(CaptureError::Cancelled) => {
                "Screen sharing was cancelled".to_string()
            }
            SessionError::Acquisition(_) => "Camera or microphone is unavailable".to_string(),
            SessionError::EngineJoin(_) => "Could not connect to the consultation".to_string(),
            SessionError::Publish(_) => "Lost connection to the consultation".to_string(),
            SessionError::Subscribe { .. } => "A participant's media is unavailable".to_string(),
            SessionError::SendMessage { .. } => "Message not sent, tap to retry".to_string(),
            SessionError::Mute { .. } => "Could not change mute state".to_string(),
            SessionError::ScreenShareInFlight => "Screen sharing is already changing".to_string(),
            SessionError::InvalidState { .. } | SessionError::NotRetryable(_) => {
                "That action is not available right now".to_string()
            }
            SessionError::Cancelled => "The consultation has ended".to_string(),
            SessionError::Teardown { .. } | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::Acquisition(CaptureError::Cancelled).is_fatal());
        assert!(SessionError::EngineJoin(EngineError::Network("down".to_string())).is_fatal());
        assert!(SessionError::Publish(EngineError::Failure("x".to_string())).is_fatal());

        assert!(!SessionError::Subscribe {
            participant_id: ParticipantId::from("p1"),
            kind: TrackKind::Video,
            source: EngineError::Failure("x".to_string()),
        }
        .is_fatal());
        assert!(!SessionError::SendMessage {
            correlation_id: CorrelationId::new(),
            source: MessagingError::Status { status: 503 },
        }
        .is_fatal());
        assert!(!SessionError::ScreenShareInFlight.is_fatal());
        assert!(!SessionError::Cancelled.is_fatal());
    }

    #[test]
    fn test_failure_reason_distinguishes_device_from_connection() {
        assert_eq!(
            SessionError::Acquisition(CaptureError::PermissionDenied("camera".to_string()))
                .failure_reason(),
            Some(FailureReason::MediaDevice)
        );
        assert_eq!(
            SessionError::EngineJoin(EngineError::Rejected("token".to_string()))
                .failure_reason(),
            Some(FailureReason::Connection)
        );
        assert_eq!(
            SessionError::Publish(EngineError::Network("reset".to_string())).failure_reason(),
            Some(FailureReason::Connection)
        );
        assert_eq!(
            SessionError::SendMessage {
                correlation_id: CorrelationId::new(),
                source: MessagingError::Status { status: 500 },
            }
            .failure_reason(),
            None
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SessionError::EngineJoin(EngineError::Rejected(
            "invalid token 006abcdef for uid 42".to_string(),
        ));
        assert!(!err.client_message().contains("006abc"));

        let err = SessionError::Internal("oneshot dropped at actor.rs:120".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                SessionError::InvalidState {
                    operation: "toggle_screen_share",
                    state: SessionState::Idle,
                }
            ),
            "toggle_screen_share is not allowed while idle"
        );
        assert_eq!(
            format!(
                "{}",
                SessionError::Subscribe {
                    participant_id: ParticipantId::from("1001"),
                    kind: TrackKind::Audio,
                    source: EngineError::Network("timeout".to_string()),
                }
            ),
            "Subscribe to audio of 1001 failed: Engine network error: timeout"
        );
        assert_eq!(
            format!("{}", MessagingError::Status { status: 502 }),
            "Messaging service returned status 502"
        );
    }
}
