//! Fake capture devices and track handles.

use async_trait::async_trait;
use consult_session::errors::CaptureError;
use consult_session::media::{CameraProfile, CaptureDevices, TrackHandle, TrackKind, TrackSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::gate::Gate;

/// In-memory track handle.
///
/// Counts `close` calls so tests can assert that every track is closed
/// exactly once.
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    muted: AtomicBool,
    closes: AtomicUsize,
}

impl FakeTrack {
    /// Create a track.
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            muted: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    /// Track id.
    pub fn track_id(&self) -> &str {
        &self.id
    }

    /// Number of times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Whether `close` was called at least once.
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Current engine-visible muted flag.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackHandle for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn set_muted(&self, muted: bool) -> Result<(), CaptureError> {
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake capture devices.
///
/// Each source succeeds by default. Use [`FakeCapture::deny`] to script a
/// failure and [`FakeCapture::hold_screen`] to park screen acquisition until
/// [`FakeCapture::release_screen`].
#[derive(Default)]
pub struct FakeCapture {
    created: Mutex<Vec<(TrackSource, Arc<FakeTrack>)>>,
    failures: Mutex<HashMap<TrackSource, CaptureError>>,
    attempts: AtomicUsize,
    screen_gate: Gate,
}

impl FakeCapture {
    /// Create capture devices where every source succeeds.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every acquisition of `source` fail with `error`.
    pub fn deny(&self, source: TrackSource, error: CaptureError) {
        self.failures.lock().unwrap().insert(source, error);
    }

    /// Let `source` succeed again.
    pub fn allow(&self, source: TrackSource) {
        self.failures.lock().unwrap().remove(&source);
    }

    /// Park screen acquisitions until [`Self::release_screen`].
    pub fn hold_screen(&self) {
        self.screen_gate.close();
    }

    /// Let parked screen acquisitions proceed.
    pub fn release_screen(&self) {
        self.screen_gate.open();
    }

    /// Acquisition attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every track handed out, in acquisition order.
    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, track)| Arc::clone(track))
            .collect()
    }

    /// Tracks handed out for `source`, in acquisition order.
    pub fn tracks_from(&self, source: TrackSource) -> Vec<Arc<FakeTrack>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == source)
            .map(|(_, track)| Arc::clone(track))
            .collect()
    }

    /// Tracks that have not been closed.
    pub fn open_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks().into_iter().filter(|t| !t.is_closed()).collect()
    }

    /// Open tracks of the video class (camera or screen).
    pub fn open_video_tracks(&self) -> usize {
        self.open_tracks()
            .iter()
            .filter(|t| t.kind == TrackKind::Video)
            .count()
    }

    /// Panics unless every handed-out track was closed exactly once.
    pub fn assert_all_closed_once(&self) {
        for track in self.tracks() {
            assert_eq!(
                track.close_count(),
                1,
                "track {} closed {} times",
                track.id,
                track.close_count()
            );
        }
    }

    async fn acquire(&self, source: TrackSource) -> Result<Arc<dyn TrackHandle>, CaptureError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if source == TrackSource::Screen {
            self.screen_gate.pass().await;
        }

        if let Some(error) = self.failures.lock().unwrap().get(&source).cloned() {
            return Err(error);
        }

        let mut created = self.created.lock().unwrap();
        let track = FakeTrack::new(
            format!("{}-{}", source.as_str(), created.len() + 1),
            source.kind(),
        );
        created.push((source, Arc::clone(&track)));
        Ok(track)
    }
}

#[async_trait]
impl CaptureDevices for FakeCapture {
    async fn create_microphone_track(&self) -> Result<Arc<dyn TrackHandle>, CaptureError> {
        self.acquire(TrackSource::Microphone).await
    }

    async fn create_camera_track(
        &self,
        _profile: &CameraProfile,
    ) -> Result<Arc<dyn TrackHandle>, CaptureError> {
        self.acquire(TrackSource::Camera).await
    }

    async fn create_screen_track(&self) -> Result<Arc<dyn TrackHandle>, CaptureError> {
        self.acquire(TrackSource::Screen).await
    }
}
