//! Local Media Manager.
//!
//! Invariants held by [`LocalTrackSet`]:
//! - at most one audio track and at most one video-class (camera or screen) track
//! - a video-class track is only installed into an empty slot, so a source swap
//!   must take and release the old track before the new one can be installed
//! - muting flips the track's muted flag and never closes it

use super::{CameraProfile, CaptureDevices, MediaConfig, TrackHandle, TrackKind};
use crate::errors::SessionError;
use crate::state::SourceMode;

use std::sync::Arc;
use tracing::{debug, warn};

/// Where a local track's media comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    /// Microphone capture.
    Microphone,
    /// Camera capture.
    Camera,
    /// Screen capture.
    Screen,
}

impl TrackSource {
    /// Audio for the microphone, video for camera and screen.
    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }

    /// Returns the source as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackSource::Microphone => "microphone",
            TrackSource::Camera => "camera",
            TrackSource::Screen => "screen",
        }
    }
}

impl From<SourceMode> for TrackSource {
    fn from(mode: SourceMode) -> Self {
        match mode {
            SourceMode::Camera => TrackSource::Camera,
            SourceMode::Screen => TrackSource::Screen,
        }
    }
}

/// An acquired local capture track.
///
/// Closes its handle on drop; there is no other way to close it.
#[derive(Debug)]
pub struct LocalTrack {
    handle: Arc<dyn TrackHandle>,
    source: TrackSource,
    published: bool,
}

impl LocalTrack {
    fn new(handle: Arc<dyn TrackHandle>, source: TrackSource) -> Self {
        Self {
            handle,
            source,
            published: false,
        }
    }

    /// Track identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Capture source.
    #[must_use]
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Audio or video.
    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    /// Handle to pass to the engine for publish/unpublish.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn TrackHandle> {
        Arc::clone(&self.handle)
    }

    /// Whether the engine currently has this track published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    pub(crate) fn set_published(&mut self, published: bool) {
        self.published = published;
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        debug!(
            target: "consult.media",
            track_id = %self.handle.id(),
            source = self.source.as_str(),
            "Closing local track"
        );
        self.handle.close();
    }
}

/// The session's single set of local tracks.
#[derive(Debug, Default)]
pub struct LocalTrackSet {
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
    audio_muted: bool,
    video_muted: bool,
    source_mode: SourceMode,
}

impl LocalTrackSet {
    /// The microphone track, if acquired.
    #[must_use]
    pub fn audio(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    /// The camera or screen track, if acquired.
    #[must_use]
    pub fn video(&self) -> Option<&LocalTrack> {
        self.video.as_ref()
    }

    /// Microphone muted flag.
    #[must_use]
    pub fn audio_muted(&self) -> bool {
        self.audio_muted
    }

    /// Video-class muted flag.
    #[must_use]
    pub fn video_muted(&self) -> bool {
        self.video_muted
    }

    /// Source feeding the video-class track.
    #[must_use]
    pub fn source_mode(&self) -> SourceMode {
        self.source_mode
    }

    /// Number of open video-class tracks (0 or 1).
    #[must_use]
    pub fn video_class_open(&self) -> usize {
        usize::from(self.video.is_some())
    }

    /// Whether no track is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// Handles of every held track, audio first.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<dyn TrackHandle>> {
        self.iter().map(LocalTrack::handle).collect()
    }

    /// Handles of the tracks the engine currently has published.
    #[must_use]
    pub fn published_handles(&self) -> Vec<Arc<dyn TrackHandle>> {
        self.iter()
            .filter(|t| t.is_published())
            .map(LocalTrack::handle)
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &LocalTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    pub(crate) fn mark_all_published(&mut self, published: bool) {
        for track in self.audio.iter_mut().chain(self.video.iter_mut()) {
            track.set_published(published);
        }
    }

    pub(crate) fn video_mut(&mut self) -> Option<&mut LocalTrack> {
        self.video.as_mut()
    }
}

/// Local Media Manager: acquires, mutes, and releases capture tracks.
pub struct LocalMedia {
    capture: Arc<dyn CaptureDevices>,
    tracks: LocalTrackSet,
    camera: CameraProfile,
}

impl LocalMedia {
    /// Create a manager with no tracks acquired.
    #[must_use]
    pub fn new(capture: Arc<dyn CaptureDevices>) -> Self {
        Self {
            capture,
            tracks: LocalTrackSet::default(),
            camera: CameraProfile::default(),
        }
    }

    /// Read access to the held tracks.
    #[must_use]
    pub fn tracks(&self) -> &LocalTrackSet {
        &self.tracks
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut LocalTrackSet {
        &mut self.tracks
    }

    /// Acquire microphone and camera.
    ///
    /// Fails closed: if the camera is denied after the microphone was granted,
    /// the microphone is released and the whole acquisition fails.
    pub async fn acquire_camera_and_mic(&mut self, config: &MediaConfig) -> Result<(), SessionError> {
        if !self.tracks.is_empty() {
            return Err(SessionError::Internal(
                "local tracks already acquired".to_string(),
            ));
        }

        let microphone = self
            .capture
            .create_microphone_track()
            .await
            .map_err(SessionError::Acquisition)?;
        let microphone = LocalTrack::new(microphone, TrackSource::Microphone);

        let camera = match self.capture.create_camera_track(&config.camera).await {
            Ok(handle) => LocalTrack::new(handle, TrackSource::Camera),
            Err(e) => {
                warn!(
                    target: "consult.media",
                    error = %e,
                    "Camera acquisition failed, releasing microphone"
                );
                self.release(microphone);
                return Err(SessionError::Acquisition(e));
            }
        };

        // Errors below drop both tracks, which closes them.
        if config.start_audio_muted {
            microphone
                .handle
                .set_muted(true)
                .await
                .map_err(SessionError::Acquisition)?;
        }
        if config.start_video_muted {
            camera
                .handle
                .set_muted(true)
                .await
                .map_err(SessionError::Acquisition)?;
        }

        debug!(
            target: "consult.media",
            microphone = %microphone.id(),
            camera = %camera.id(),
            "Acquired camera and microphone"
        );

        self.camera = config.camera;
        self.tracks.audio = Some(microphone);
        self.tracks.video = Some(camera);
        self.tracks.audio_muted = config.start_audio_muted;
        self.tracks.video_muted = config.start_video_muted;
        self.tracks.source_mode = SourceMode::Camera;
        Ok(())
    }

    /// Acquire a screen capture track. Not installed until [`Self::install_video`].
    pub async fn acquire_screen(&self) -> Result<LocalTrack, SessionError> {
        let handle = self
            .capture
            .create_screen_track()
            .await
            .map_err(SessionError::Acquisition)?;
        Ok(LocalTrack::new(handle, TrackSource::Screen))
    }

    /// Acquire a camera track with the profile used at start.
    pub async fn acquire_camera(&self) -> Result<LocalTrack, SessionError> {
        let handle = self
            .capture
            .create_camera_track(&self.camera)
            .await
            .map_err(SessionError::Acquisition)?;
        Ok(LocalTrack::new(handle, TrackSource::Camera))
    }

    /// Acquire the video-class track for `mode`.
    pub async fn acquire_source(&self, mode: SourceMode) -> Result<LocalTrack, SessionError> {
        match mode {
            SourceMode::Camera => self.acquire_camera().await,
            SourceMode::Screen => self.acquire_screen().await,
        }
    }

    /// Release a track (closes it).
    pub fn release(&self, track: LocalTrack) {
        debug!(
            target: "consult.media",
            track_id = %track.id(),
            source = track.source().as_str(),
            "Releasing local track"
        );
        drop(track);
    }

    /// Remove the video-class track from the set so it can be unpublished and released.
    pub fn take_video(&mut self) -> Option<LocalTrack> {
        self.tracks.video.take()
    }

    /// Install a new video-class track into the empty slot.
    ///
    /// The video mute flag belongs to the set, so a muted set mutes the new
    /// track before it is installed. Fails (and releases `track`) if a
    /// video-class track is still held or the mute cannot be applied.
    pub async fn install_video(
        &mut self,
        track: LocalTrack,
        mode: SourceMode,
    ) -> Result<(), SessionError> {
        if self.tracks.video.is_some() {
            self.release(track);
            return Err(SessionError::Internal(
                "video-class track already open".to_string(),
            ));
        }
        if self.tracks.video_muted {
            if let Err(source) = track.handle.set_muted(true).await {
                self.release(track);
                return Err(SessionError::Mute {
                    kind: TrackKind::Video,
                    source,
                });
            }
        }
        self.tracks.video = Some(track);
        self.tracks.source_mode = mode;
        Ok(())
    }

    /// Set the muted flag of the track of `kind`.
    pub async fn set_muted(&mut self, kind: TrackKind, muted: bool) -> Result<(), SessionError> {
        let track = match kind {
            TrackKind::Audio => self.tracks.audio.as_ref(),
            TrackKind::Video => self.tracks.video.as_ref(),
        };
        let Some(track) = track else {
            return Err(SessionError::Mute {
                kind,
                source: crate::errors::CaptureError::DeviceUnavailable(format!(
                    "no local {kind} track"
                )),
            });
        };

        track
            .handle
            .set_muted(muted)
            .await
            .map_err(|source| SessionError::Mute { kind, source })?;

        match kind {
            TrackKind::Audio => self.tracks.audio_muted = muted,
            TrackKind::Video => self.tracks.video_muted = muted,
        }
        debug!(target: "consult.media", kind = %kind, muted, "Local track mute changed");
        Ok(())
    }

    /// Flip the muted flag of `kind`; returns the new value.
    pub async fn toggle_muted(&mut self, kind: TrackKind) -> Result<bool, SessionError> {
        let muted = match kind {
            TrackKind::Audio => !self.tracks.audio_muted,
            TrackKind::Video => !self.tracks.video_muted,
        };
        self.set_muted(kind, muted).await?;
        Ok(muted)
    }

    /// Release every held track; returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let tracks: Vec<LocalTrack> = self
            .tracks
            .audio
            .take()
            .into_iter()
            .chain(self.tracks.video.take())
            .collect();
        let count = tracks.len();
        for track in tracks {
            self.release(track);
        }
        count
    }
}
