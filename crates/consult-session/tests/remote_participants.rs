//! Remote participant registry tests driven through engine events.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::ParticipantId;
use consult_session::engine::EngineEvent;
use consult_session::errors::EngineError;
use consult_session::media::{MediaConfig, TrackKind};
use consult_session::state::SessionState;
use consult_test_utils::fixtures::{eventually, wait_for, TestSession};
use consult_test_utils::{EngineOp, FakeEngine};

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

fn published(id: &str, kind: TrackKind) -> EngineEvent {
    EngineEvent::UserPublished {
        participant_id: pid(id),
        kind,
    }
}

fn unpublished(id: &str, kind: TrackKind) -> EngineEvent {
    EngineEvent::UserUnpublished {
        participant_id: pid(id),
        kind,
    }
}

#[tokio::test]
async fn test_published_video_then_left() {
    let session = TestSession::spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    session.engine.emit(EngineEvent::UserJoined(pid("p1")));
    session.engine.emit(published("p1", TrackKind::Video));

    let snapshot = wait_for(&mut rx, |s| {
        s.get(&pid("p1"))
            .is_some_and(|p| p.track(TrackKind::Video).is_some())
    })
    .await;
    let p1 = snapshot.get(&pid("p1")).unwrap();
    assert!(p1.track(TrackKind::Audio).is_none());
    assert_eq!(session.engine.subscribe_calls(), 1);

    session.engine.emit(EngineEvent::UserLeft(pid("p1")));
    wait_for(&mut rx, |s| s.is_empty()).await;
    eventually(|| {
        session
            .engine
            .ops()
            .contains(&EngineOp::Unsubscribe(pid("p1"), TrackKind::Video))
    })
    .await;

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_join_alone_never_subscribes() {
    let session = TestSession::spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    session.engine.emit(EngineEvent::UserJoined(pid("p1")));
    let snapshot = wait_for(&mut rx, |s| s.contains_key(&pid("p1"))).await;

    assert!(snapshot.get(&pid("p1")).unwrap().is_idle());
    assert_eq!(session.engine.subscribe_calls(), 0);

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_events_during_join_are_not_lost() {
    let engine = FakeEngine::new();
    engine.hold_joins();
    let session = TestSession::builder().with_engine(engine.clone()).spawn();

    let handle = session.handle.clone();
    let start = tokio::spawn(async move { handle.start(MediaConfig::default()).await });
    eventually(|| engine.join_calls() == 1).await;

    // A participant already in the channel is announced while joining.
    assert!(engine.has_event_sink());
    engine.emit_participant_with_media("p1");
    engine.release_joins();
    start.await.unwrap().unwrap();

    let mut rx = session.handle.watch_participants();
    wait_for(&mut rx, |s| {
        s.get(&pid("p1")).is_some_and(|p| {
            p.track(TrackKind::Audio).is_some() && p.track(TrackKind::Video).is_some()
        })
    })
    .await;

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_subscribe_failure_keeps_participant_without_track() {
    let engine = FakeEngine::new();
    engine.fail_subscribe("p1", TrackKind::Video, EngineError::Failure("codec".to_string()));
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    engine.emit_participant_with_media("p1");
    let snapshot = wait_for(&mut rx, |s| {
        s.get(&pid("p1"))
            .is_some_and(|p| p.track(TrackKind::Audio).is_some())
    })
    .await;
    eventually(|| engine.subscribe_calls() == 2).await;

    assert!(snapshot.get(&pid("p1")).unwrap().track(TrackKind::Video).is_none());
    assert_eq!(session.handle.state(), SessionState::Connected);

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_unpublished_clears_track_but_keeps_participant() {
    let session = TestSession::spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    session.engine.emit_participant_with_media("p1");
    wait_for(&mut rx, |s| {
        s.get(&pid("p1")).is_some_and(|p| {
            p.track(TrackKind::Audio).is_some() && p.track(TrackKind::Video).is_some()
        })
    })
    .await;

    session.engine.emit(unpublished("p1", TrackKind::Video));
    let snapshot = wait_for(&mut rx, |s| {
        s.get(&pid("p1"))
            .is_some_and(|p| p.track(TrackKind::Video).is_none())
    })
    .await;
    assert!(snapshot
        .get(&pid("p1"))
        .unwrap()
        .track(TrackKind::Audio)
        .is_some());

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_unpublish_while_subscribing_discards_result() {
    let engine = FakeEngine::new();
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    engine.hold_subscribes();
    engine.emit(EngineEvent::UserJoined(pid("p1")));
    engine.emit(published("p1", TrackKind::Video));
    eventually(|| engine.subscribe_calls() == 1).await;

    engine.emit(unpublished("p1", TrackKind::Video));
    engine.release_subscribes();

    // The late subscription is dropped instead of stored.
    eventually(|| engine.unsubscribe_calls() == 1).await;
    let snapshot = wait_for(&mut rx, |s| s.contains_key(&pid("p1"))).await;
    assert!(snapshot.get(&pid("p1")).unwrap().is_idle());

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_left_while_subscribing_discards_result() {
    let engine = FakeEngine::new();
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    engine.hold_subscribes();
    engine.emit_participant_with_media("p1");
    eventually(|| engine.subscribe_calls() == 2).await;

    engine.emit(EngineEvent::UserLeft(pid("p1")));
    wait_for(&mut rx, |s| s.is_empty()).await;
    engine.release_subscribes();

    eventually(|| engine.unsubscribe_calls() == 2).await;
    assert!(session.handle.participants().is_empty());

    session.leave_and_join().await;
}

#[tokio::test]
async fn test_leave_drops_in_flight_subscribes() {
    let engine = FakeEngine::new();
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;

    engine.hold_subscribes();
    engine.emit_participant_with_media("p1");
    eventually(|| engine.subscribe_calls() == 2).await;

    let handle = session.handle.clone();
    handle.leave().await.unwrap();
    engine.release_subscribes();
    tokio::task::yield_now().await;

    assert!(session.handle.participants().is_empty());
    assert!(engine.remote_tracks().is_empty());
    assert!(!engine.has_event_sink());

    // Events after teardown go nowhere.
    assert!(!engine.emit(EngineEvent::UserJoined(pid("p2"))));
    assert!(session.handle.participants().is_empty());
}

#[tokio::test]
async fn test_leave_unsubscribes_every_held_track() {
    let engine = FakeEngine::new();
    let session = TestSession::builder().with_engine(engine.clone()).spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    engine.emit_participant_with_media("p1");
    engine.emit(EngineEvent::UserJoined(pid("p2")));
    engine.emit(published("p2", TrackKind::Audio));
    wait_for(&mut rx, |s| {
        s.len() == 2
            && s.get(&pid("p2"))
                .is_some_and(|p| p.track(TrackKind::Audio).is_some())
            && s.get(&pid("p1")).is_some_and(|p| !p.is_idle())
            && s.get(&pid("p1"))
                .is_some_and(|p| p.track(TrackKind::Video).is_some())
            && s.get(&pid("p1"))
                .is_some_and(|p| p.track(TrackKind::Audio).is_some())
    })
    .await;

    session.handle.leave().await.unwrap();

    assert!(session.handle.participants().is_empty());
    assert_eq!(engine.unsubscribe_calls(), 3);

    // Remote subscriptions are dropped after the local tracks are unpublished
    // and before the engine is left.
    let ops = engine.ops();
    let last_unsubscribe = ops
        .iter()
        .rposition(|op| matches!(op, EngineOp::Unsubscribe(..)))
        .unwrap();
    let unpublish = ops
        .iter()
        .position(|op| matches!(op, EngineOp::Unpublish(_)))
        .unwrap();
    let leave = ops.iter().position(|op| matches!(op, EngineOp::Leave)).unwrap();
    assert!(unpublish < last_unsubscribe);
    assert!(last_unsubscribe < leave);
}

#[tokio::test]
async fn test_registry_membership_follows_join_and_left() {
    let session = TestSession::spawn();
    session.start_connected().await;
    let mut rx = session.handle.watch_participants();

    let history = [
        EngineEvent::UserJoined(pid("a")),
        EngineEvent::UserJoined(pid("b")),
        EngineEvent::UserLeft(pid("a")),
        EngineEvent::UserJoined(pid("c")),
        EngineEvent::UserLeft(pid("b")),
        EngineEvent::UserJoined(pid("a")),
        EngineEvent::UserLeft(pid("missing")),
    ];
    for event in history {
        session.engine.emit(event);
    }

    let snapshot = wait_for(&mut rx, |s| {
        s.keys().cloned().collect::<Vec<_>>() == vec![pid("a"), pid("c")]
    })
    .await;
    assert!(snapshot.values().all(|p| p.is_idle()));

    session.leave_and_join().await;
}
