//! Session lifecycle state and the transition table.
//!
//! ```text
//! Idle ──► Connecting ──► Connected ──► Ended (T)
//!              │              │
//!              ├──► Failed(T) ◄┘
//!              └──► Ended (T)      (leave() while connecting)
//! ```
//!
//! Only the session actor mutates the state; every other component receives
//! it through [`SessionSnapshot`](crate::session::SessionSnapshot).

use crate::errors::SessionError;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one consultation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, `start()` not yet called.
    Idle,
    /// Acquiring local media, joining the engine, publishing tracks.
    Connecting,
    /// Joined and publishing; user operations are accepted.
    Connected,
    /// Torn down after `leave()` or after every handle was dropped.
    Ended,
    /// Torn down after a fatal error.
    Failed,
}

impl SessionState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }

    /// Whether the session currently holds resources that teardown must release.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// Transition table.
    #[must_use]
    pub const fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Connecting)
                | (
                    SessionState::Connecting,
                    SessionState::Connected | SessionState::Failed | SessionState::Ended
                )
                | (
                    SessionState::Connected,
                    SessionState::Ended | SessionState::Failed
                )
        )
    }

    /// Reject `operation` unless the session is in one of `allowed`.
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), SessionError> {
        if allowed.contains(self) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: *self,
            })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which capture source feeds the published video-class track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Camera capture.
    #[default]
    Camera,
    /// Screen capture.
    Screen,
}

impl SourceMode {
    /// The mode a screen-share toggle switches to.
    #[must_use]
    pub const fn toggled(&self) -> SourceMode {
        match self {
            SourceMode::Camera => SourceMode::Screen,
            SourceMode::Screen => SourceMode::Camera,
        }
    }

    /// Returns the mode as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Camera => "camera",
            SourceMode::Screen => "screen",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Idle,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Ended,
        SessionState::Failed,
    ];

    #[test]
    fn test_happy_path_transitions_allowed() {
        assert!(SessionState::Idle.can_transition_to(SessionState::Connecting));
        assert!(SessionState::Connecting.can_transition_to(SessionState::Connected));
        assert!(SessionState::Connected.can_transition_to(SessionState::Ended));
    }

    #[test]
    fn test_failure_reachable_from_connecting_and_connected() {
        assert!(SessionState::Connecting.can_transition_to(SessionState::Failed));
        assert!(SessionState::Connected.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [SessionState::Ended, SessionState::Failed] {
            assert!(terminal.is_terminal());
            for next in ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_no_skipping_connecting() {
        assert!(!SessionState::Idle.can_transition_to(SessionState::Connected));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Ended));
        assert!(!SessionState::Connected.can_transition_to(SessionState::Connecting));
    }

    #[test]
    fn test_require_reports_operation_and_state() {
        let err = SessionState::Failed
            .require("toggle_audio_mute", &[SessionState::Connected])
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "toggle_audio_mute",
                state: SessionState::Failed
            }
        ));
        assert!(SessionState::Connected
            .require("toggle_audio_mute", &[SessionState::Connected])
            .is_ok());
    }

    #[test]
    fn test_source_mode_toggles_back_and_forth() {
        let mode = SourceMode::default();
        assert_eq!(mode, SourceMode::Camera);
        assert_eq!(mode.toggled(), SourceMode::Screen);
        assert_eq!(mode.toggled().toggled(), SourceMode::Camera);
    }
}
