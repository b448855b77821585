//! Screen-share toggle tests: swap ordering, serialization, and recovery.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use consult_session::errors::{CaptureError, EngineError, SessionError};
use consult_session::media::TrackSource;
use consult_session::state::{SessionState, SourceMode};
use consult_test_utils::fixtures::{eventually, TestSession};
use consult_test_utils::{EngineOp, FakeCapture, FakeEngine};

#[tokio::test]
async fn test_toggle_swaps_camera_for_screen() {
    let session = TestSession::spawn();
    session.start_connected().await;

    let mode = session.handle.toggle_screen_share().await.unwrap();
    assert_eq!(mode, SourceMode::Screen);
    assert_eq!(session.handle.snapshot().source_mode, SourceMode::Screen);

    let camera = &session.capture.tracks_from(TrackSource::Camera)[0];
    let screen = &session.capture.tracks_from(TrackSource::Screen)[0];
    assert_eq!(camera.close_count(), 1);
    assert!(!screen.is_closed());
    assert_eq!(session.capture.open_video_tracks(), 1);

    let published = session.engine.published();
    assert!(published.contains(&screen.track_id().to_string()));
    assert!(!published.contains(&camera.track_id().to_string()));

    // The camera is unpublished before the screen is published.
    let ops = session.engine.ops();
    let unpublish = ops
        .iter()
        .position(|op| *op == EngineOp::Unpublish(vec![camera.track_id().to_string()]))
        .expect("camera unpublished");
    let publish = ops
        .iter()
        .position(|op| *op == EngineOp::Publish(vec![screen.track_id().to_string()]))
        .expect("screen published");
    assert!(unpublish < publish);

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_toggle_sequence_keeps_one_video_track() {
    let session = TestSession::spawn();
    session.start_connected().await;

    for n in 1..=5 {
        let mode = session.handle.toggle_screen_share().await.unwrap();
        let expected = if n % 2 == 0 {
            SourceMode::Camera
        } else {
            SourceMode::Screen
        };
        assert_eq!(mode, expected, "after {n} toggles");
        assert_eq!(session.capture.open_video_tracks(), 1, "after {n} toggles");
        assert_eq!(session.handle.state(), SessionState::Connected);
    }

    // Interleave mute toggles; they never touch hardware.
    session.handle.toggle_audio_mute().await.unwrap();
    session.handle.toggle_video_mute().await.unwrap();
    assert_eq!(session.capture.attempts(), 7);

    let capture = session.capture.clone();
    let engine = session.engine.clone();
    session.leave_and_join().await;

    assert_eq!(capture.tracks().len(), 7);
    capture.assert_all_closed_once();
    assert_eq!(engine.leave_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_toggle_is_rejected() {
    let capture = FakeCapture::new();
    let session = TestSession::builder().with_capture(capture.clone()).spawn();
    session.start_connected().await;

    capture.hold_screen();
    let handle = session.handle.clone();
    let first = tokio::spawn(async move { handle.toggle_screen_share().await });
    // mic + camera + the parked screen request
    eventually(|| capture.attempts() == 3).await;

    let second = session.handle.toggle_screen_share().await;
    assert!(matches!(second, Err(SessionError::ScreenShareInFlight)));

    capture.release_screen();
    assert_eq!(first.await.unwrap().unwrap(), SourceMode::Screen);

    assert_eq!(session.handle.snapshot().source_mode, SourceMode::Screen);
    assert_eq!(capture.open_video_tracks(), 1);
    assert_eq!(capture.tracks_from(TrackSource::Screen).len(), 1);

    // The in-flight flag clears once the first toggle resolves.
    assert_eq!(
        session.handle.toggle_screen_share().await.unwrap(),
        SourceMode::Camera
    );

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_abandoned_toggle_keeps_rejecting_until_swap_finishes() {
    let capture = FakeCapture::new();
    let session = TestSession::builder().with_capture(capture.clone()).spawn();
    session.start_connected().await;

    capture.hold_screen();
    let handle = session.handle.clone();
    let first = tokio::spawn(async move { handle.toggle_screen_share().await });
    eventually(|| capture.attempts() == 3).await;

    // The caller gives up; the actor is still swapping.
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let second = session.handle.toggle_screen_share().await;
    assert!(matches!(second, Err(SessionError::ScreenShareInFlight)));

    capture.release_screen();
    // Mailbox is serial: once this replies the swap has been answered.
    session.handle.toggle_audio_mute().await.unwrap();
    assert_eq!(session.handle.snapshot().source_mode, SourceMode::Screen);
    assert_eq!(capture.tracks_from(TrackSource::Screen).len(), 1);

    assert_eq!(
        session.handle.toggle_screen_share().await.unwrap(),
        SourceMode::Camera
    );

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_screen_denied_recovers_camera() {
    let capture = FakeCapture::new();
    capture.deny(TrackSource::Screen, CaptureError::Cancelled);
    let session = TestSession::builder().with_capture(capture.clone()).spawn();
    session.start_connected().await;

    let err = session.handle.toggle_screen_share().await.unwrap_err();
    assert!(matches!(err, SessionError::Acquisition(CaptureError::Cancelled)));

    let snapshot = session.handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.source_mode, SourceMode::Camera);

    let cameras = capture.tracks_from(TrackSource::Camera);
    assert_eq!(cameras.len(), 2);
    assert!(cameras[0].is_closed());
    assert!(!cameras[1].is_closed());
    assert_eq!(capture.open_video_tracks(), 1);
    assert!(session
        .engine
        .published()
        .contains(&cameras[1].track_id().to_string()));

    session.leave_and_join().await;
    capture.assert_all_closed_once();
}

#[tokio::test]
async fn test_publish_failure_during_swap_fails_session() {
    let engine = FakeEngine::new();
    // The start sequence publishes once; the swap's publish is the second call.
    engine.fail_publish_from(2, EngineError::Network("connection lost".to_string()));
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;

    let err = session.handle.toggle_screen_share().await.unwrap_err();
    assert!(matches!(err, SessionError::Publish(_)));

    let snapshot = session.handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Failed);
    assert_eq!(
        snapshot.failure.map(|f| f.state_at_failure),
        Some(SessionState::Connected)
    );
    session.capture.assert_all_closed_once();
    assert_eq!(engine.leave_calls(), 1);
}

#[tokio::test]
async fn test_camera_unavailable_on_return_fails_session() {
    let capture = FakeCapture::new();
    let session = TestSession::builder().with_capture(capture.clone()).spawn();
    session.start_connected().await;
    session.handle.toggle_screen_share().await.unwrap();

    capture.deny(
        TrackSource::Camera,
        CaptureError::DeviceUnavailable("camera in use".to_string()),
    );
    let err = session.handle.toggle_screen_share().await.unwrap_err();
    assert!(matches!(err, SessionError::Acquisition(_)));
    assert_eq!(session.handle.state(), SessionState::Failed);
    capture.assert_all_closed_once();
}

#[tokio::test]
async fn test_video_mute_carries_across_source_swaps() {
    let session = TestSession::spawn();
    session.start_connected().await;

    assert!(session.handle.toggle_video_mute().await.unwrap());
    session.handle.toggle_screen_share().await.unwrap();

    assert!(session.handle.snapshot().video_muted);
    let screen = &session.capture.tracks_from(TrackSource::Screen)[0];
    assert!(screen.is_muted());

    assert_eq!(
        session.handle.toggle_screen_share().await.unwrap(),
        SourceMode::Camera
    );
    assert!(session.handle.snapshot().video_muted);
    let cameras = session.capture.tracks_from(TrackSource::Camera);
    assert_eq!(cameras.len(), 2);
    assert!(cameras[1].is_muted());

    // Unmuting reaches the reacquired camera.
    assert!(!session.handle.toggle_video_mute().await.unwrap());
    assert!(!cameras[1].is_muted());

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_toggle_rejected_outside_connected() {
    let session = TestSession::spawn();
    let err = session.handle.toggle_screen_share().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            operation: "toggle_screen_share",
            state: SessionState::Idle
        }
    ));
    assert_eq!(session.capture.attempts(), 0);
}
