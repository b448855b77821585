//! Fake media engine.
//!
//! One [`FakeEngine`] acts as both the engine factory and the single client it
//! hands out, so a test keeps a clone and inspects every call the session made.

use async_trait::async_trait;
use common::secret::SecretString;
use common::types::ParticipantId;
use consult_session::engine::{EngineClient, EngineEvent, EngineEventSink, MediaEngine};
use consult_session::errors::EngineError;
use consult_session::media::{TrackHandle, TrackKind};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::fake_capture::FakeTrack;
use crate::gate::Gate;

/// One call made against the fake engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    /// `join(channel, uid)`.
    Join {
        /// Channel name.
        channel: String,
        /// Local participant.
        uid: ParticipantId,
    },
    /// `publish` with the given track ids.
    Publish(Vec<String>),
    /// `unpublish` with the given track ids.
    Unpublish(Vec<String>),
    /// `subscribe(participant, kind)`.
    Subscribe(ParticipantId, TrackKind),
    /// `unsubscribe(participant, kind)`.
    Unsubscribe(ParticipantId, TrackKind),
    /// `leave()`.
    Leave,
}

#[derive(Default)]
struct Inner {
    ops: Mutex<Vec<EngineOp>>,
    published: Mutex<BTreeSet<String>>,
    sink: Mutex<Option<EngineEventSink>>,
    join_error: Mutex<Option<EngineError>>,
    publish_error: Mutex<Option<(usize, EngineError)>>,
    unpublish_error: Mutex<Option<EngineError>>,
    leave_error: Mutex<Option<EngineError>>,
    subscribe_errors: Mutex<HashMap<(ParticipantId, TrackKind), EngineError>>,
    remote_tracks: Mutex<Vec<Arc<FakeTrack>>>,
    publish_calls: AtomicUsize,
    clients_created: AtomicUsize,
    join_gate: Gate,
    subscribe_gate: Gate,
}

/// Fake media engine and client.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Inner>,
}

impl FakeEngine {
    /// Create an engine where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `join` fail with `error`.
    pub fn fail_join(&self, error: EngineError) {
        *self.inner.join_error.lock().unwrap() = Some(error);
    }

    /// Make the `n`-th `publish` call (1-based) and every later one fail.
    pub fn fail_publish_from(&self, n: usize, error: EngineError) {
        *self.inner.publish_error.lock().unwrap() = Some((n, error));
    }

    /// Make every `unpublish` fail with `error`.
    pub fn fail_unpublish(&self, error: EngineError) {
        *self.inner.unpublish_error.lock().unwrap() = Some(error);
    }

    /// Make `leave` fail with `error`.
    pub fn fail_leave(&self, error: EngineError) {
        *self.inner.leave_error.lock().unwrap() = Some(error);
    }

    /// Make subscribing to `participant_id`'s `kind` track fail with `error`.
    pub fn fail_subscribe(&self, participant_id: &str, kind: TrackKind, error: EngineError) {
        self.inner
            .subscribe_errors
            .lock()
            .unwrap()
            .insert((ParticipantId::new(participant_id), kind), error);
    }

    /// Park `join` calls until [`Self::release_joins`].
    pub fn hold_joins(&self) {
        self.inner.join_gate.close();
    }

    /// Let parked joins proceed.
    pub fn release_joins(&self) {
        self.inner.join_gate.open();
    }

    /// Park `subscribe` calls until [`Self::release_subscribes`].
    pub fn hold_subscribes(&self) {
        self.inner.subscribe_gate.close();
    }

    /// Let parked subscribes proceed.
    pub fn release_subscribes(&self) {
        self.inner.subscribe_gate.open();
    }

    /// Deliver an event through the registered sink.
    ///
    /// Returns `false` when no sink is registered (the event is dropped, as a
    /// real engine drops events nobody listens to).
    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.inner.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Emit `user-joined` followed by `user-published` for both kinds.
    pub fn emit_participant_with_media(&self, participant_id: &str) {
        let participant_id = ParticipantId::new(participant_id);
        self.emit(EngineEvent::UserJoined(participant_id.clone()));
        for kind in [TrackKind::Audio, TrackKind::Video] {
            self.emit(EngineEvent::UserPublished {
                participant_id: participant_id.clone(),
                kind,
            });
        }
    }

    /// Whether an event sink is currently registered.
    pub fn has_event_sink(&self) -> bool {
        self.inner.sink.lock().unwrap().is_some()
    }

    /// Every call made so far, in order.
    pub fn ops(&self) -> Vec<EngineOp> {
        self.inner.ops.lock().unwrap().clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineOp) -> bool) -> usize {
        self.inner.ops.lock().unwrap().iter().filter(|op| pred(*op)).count()
    }

    /// Number of `join` calls.
    pub fn join_calls(&self) -> usize {
        self.count(|op| matches!(op, EngineOp::Join { .. }))
    }

    /// Number of `leave` calls.
    pub fn leave_calls(&self) -> usize {
        self.count(|op| matches!(op, EngineOp::Leave))
    }

    /// Number of `subscribe` calls.
    pub fn subscribe_calls(&self) -> usize {
        self.count(|op| matches!(op, EngineOp::Subscribe(..)))
    }

    /// Number of `unsubscribe` calls.
    pub fn unsubscribe_calls(&self) -> usize {
        self.count(|op| matches!(op, EngineOp::Unsubscribe(..)))
    }

    /// Ids of the local tracks currently published.
    pub fn published(&self) -> Vec<String> {
        self.inner.published.lock().unwrap().iter().cloned().collect()
    }

    /// Every remote track handed out by `subscribe`.
    pub fn remote_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.inner.remote_tracks.lock().unwrap().clone()
    }

    /// Number of clients created through [`MediaEngine::create_client`].
    pub fn clients_created(&self) -> usize {
        self.inner.clients_created.load(Ordering::SeqCst)
    }

    fn record(&self, op: EngineOp) {
        self.inner.ops.lock().unwrap().push(op);
    }
}

fn track_ids(tracks: &[Arc<dyn TrackHandle>]) -> Vec<String> {
    tracks.iter().map(|t| t.id().to_string()).collect()
}

impl MediaEngine for FakeEngine {
    fn create_client(&self) -> Arc<dyn EngineClient> {
        self.inner.clients_created.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.clone())
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn join(
        &self,
        _app_id: &str,
        channel: &str,
        _token: &SecretString,
        uid: &ParticipantId,
    ) -> Result<(), EngineError> {
        self.record(EngineOp::Join {
            channel: channel.to_string(),
            uid: uid.clone(),
        });
        self.inner.join_gate.pass().await;

        match self.inner.join_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn leave(&self) -> Result<(), EngineError> {
        self.record(EngineOp::Leave);
        self.inner.published.lock().unwrap().clear();
        match self.inner.leave_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn publish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), EngineError> {
        let ids = track_ids(tracks);
        self.record(EngineOp::Publish(ids.clone()));
        let call = self.inner.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((from, error)) = self.inner.publish_error.lock().unwrap().clone() {
            if call >= from {
                return Err(error);
            }
        }
        self.inner.published.lock().unwrap().extend(ids);
        Ok(())
    }

    async fn unpublish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), EngineError> {
        let ids = track_ids(tracks);
        self.record(EngineOp::Unpublish(ids.clone()));

        if let Some(error) = self.inner.unpublish_error.lock().unwrap().clone() {
            return Err(error);
        }
        let mut published = self.inner.published.lock().unwrap();
        for id in &ids {
            published.remove(id);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<Arc<dyn TrackHandle>, EngineError> {
        self.record(EngineOp::Subscribe(participant_id.clone(), kind));
        self.inner.subscribe_gate.pass().await;

        let key = (participant_id.clone(), kind);
        if let Some(error) = self.inner.subscribe_errors.lock().unwrap().get(&key).cloned() {
            return Err(error);
        }

        let mut remote = self.inner.remote_tracks.lock().unwrap();
        let track = FakeTrack::new(
            format!("remote-{participant_id}-{kind}-{}", remote.len() + 1),
            kind,
        );
        remote.push(Arc::clone(&track));
        Ok(track)
    }

    async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<(), EngineError> {
        self.record(EngineOp::Unsubscribe(participant_id.clone(), kind));
        Ok(())
    }

    fn set_event_sink(&self, sink: Option<EngineEventSink>) {
        *self.inner.sink.lock().unwrap() = sink;
    }
}
