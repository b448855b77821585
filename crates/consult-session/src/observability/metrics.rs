//! Metrics definitions for the consultation session orchestrator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `consult_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: 2 values (ended, failed)
//! - `status`: bounded per metric (success, error, rejected, recovered, ...)
//! - `kind`: 2 values (audio, video)
//! - `step`: bounded by teardown steps (~6 values)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Record a session start.
///
/// Metric: `consult_sessions_started_total`
/// Labels: none
pub fn record_session_started() {
    counter!("consult_sessions_started_total").increment(1);
}

/// Record a terminal state.
///
/// Metric: `consult_session_outcomes_total`
/// Labels: `outcome` (ended, failed)
pub fn record_session_outcome(outcome: &str) {
    counter!("consult_session_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how long `start()` took to reach Connected (or fail).
///
/// Metric: `consult_session_start_duration_seconds`
/// Labels: `status` (success, error, cancelled)
pub fn record_session_start_duration(status: &str, duration: Duration) {
    histogram!("consult_session_start_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Record a teardown step that failed (teardown continues regardless).
///
/// Metric: `consult_teardown_step_failures_total`
/// Labels: `step`
pub fn record_teardown_step_failure(step: &str) {
    counter!("consult_teardown_step_failures_total", "step" => step.to_string()).increment(1);
}

/// Record a screen-share toggle outcome.
///
/// Metric: `consult_screen_share_toggles_total`
/// Labels: `status` (success, rejected, recovered, error)
pub fn record_screen_share_toggle(status: &str) {
    counter!("consult_screen_share_toggles_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Remote Participants
// ============================================================================

/// Set the number of remote participants in the registry.
///
/// Metric: `consult_remote_participants`
/// Labels: none
pub fn set_remote_participants(count: usize) {
    // usize to f64 is exact for realistic participant counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("consult_remote_participants").set(count as f64);
}

/// Record a failed remote subscribe.
///
/// Metric: `consult_subscribe_failures_total`
/// Labels: `kind` (audio, video)
pub fn record_subscribe_failure(kind: &str) {
    counter!("consult_subscribe_failures_total", "kind" => kind.to_string()).increment(1);
}

// ============================================================================
// Chat
// ============================================================================

/// Record a chat message send (first attempt or retry).
///
/// Metric: `consult_chat_sends_total`
/// Labels: `status` (success, error)
pub fn record_chat_send(status: &str) {
    counter!("consult_chat_sends_total", "status" => status.to_string()).increment(1);
}

/// Record a chat poll.
///
/// Metric: `consult_chat_polls_total`
/// Labels: `status` (success, error, discarded)
pub fn record_chat_poll(status: &str) {
    counter!("consult_chat_polls_total", "status" => status.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these go to the global no-op recorder.

    #[test]
    fn test_session_lifecycle_metrics() {
        record_session_started();
        record_session_outcome("ended");
        record_session_outcome("failed");
        record_session_start_duration("success", Duration::from_millis(800));
        record_session_start_duration("error", Duration::from_millis(20));
        record_teardown_step_failure("engine_leave");
        record_screen_share_toggle("rejected");
    }

    #[test]
    fn test_participant_and_chat_metrics() {
        set_remote_participants(0);
        set_remote_participants(3);
        record_subscribe_failure("video");
        record_chat_send("success");
        record_chat_send("error");
        record_chat_poll("discarded");
    }

    #[test]
    fn test_metrics_recorded_with_expected_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_session_started();
            record_session_outcome("ended");
            set_remote_participants(2);
            record_subscribe_failure("audio");
            record_chat_poll("success");
            record_chat_poll("success");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "consult_sessions_started_total",
            "consult_session_outcomes_total",
            "consult_remote_participants",
            "consult_subscribe_failures_total",
            "consult_chat_polls_total",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }

        let polls = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "consult_chat_polls_total")
            .map(|(_, _, _, value)| value.clone())
            .unwrap();
        assert_eq!(*polls, DebugValue::Counter(2));
    }
}
