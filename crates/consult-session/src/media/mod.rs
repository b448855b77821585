//! Local capture: the capture collaborator contract and the Local Media Manager.
//!
//! - [`TrackHandle`] - opaque live audio/video stream, local or remote
//! - [`CaptureDevices`] - the platform capture collaborator (microphone, camera, screen)
//! - [`LocalMedia`] - owns the session's [`LocalTrackSet`]; acquisition, release, mute
//!
//! Capture devices are exclusively owned by the `LocalTrackSet` for the lifetime
//! of the session. A [`LocalTrack`] closes its handle when dropped, so every
//! successful acquisition is matched by exactly one close no matter which path
//! (swap, teardown, failed start) lets go of it.

mod local;

pub use local::{LocalMedia, LocalTrack, LocalTrackSet, TrackSource};

use crate::errors::CaptureError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Microphone or remote audio.
    Audio,
    /// Camera, screen, or remote video.
    Video,
}

impl TrackKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a live audio or video stream.
///
/// `close` is called exactly once per handle by this crate.
#[async_trait]
pub trait TrackHandle: Send + Sync + fmt::Debug {
    /// Stable identifier of the track (for logs and engine bookkeeping).
    fn id(&self) -> &str;

    /// Audio or video.
    fn kind(&self) -> TrackKind;

    /// Flip the engine-visible muted flag. Never releases the device.
    async fn set_muted(&self, muted: bool) -> Result<(), CaptureError>;

    /// Stop the stream and release the underlying device.
    fn close(&self);
}

/// The platform capture collaborator.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open the microphone.
    async fn create_microphone_track(&self) -> Result<Arc<dyn TrackHandle>, CaptureError>;

    /// Open the camera with the requested profile.
    async fn create_camera_track(
        &self,
        profile: &CameraProfile,
    ) -> Result<Arc<dyn TrackHandle>, CaptureError>;

    /// Open a screen (or window) capture. May prompt the user.
    async fn create_screen_track(&self) -> Result<Arc<dyn TrackHandle>, CaptureError>;
}

/// Camera capture profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraProfile {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
}

impl Default for CameraProfile {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 15,
        }
    }
}

/// Media options passed to `start()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Camera capture profile.
    pub camera: CameraProfile,
    /// Join with the microphone muted.
    pub start_audio_muted: bool,
    /// Join with the camera muted.
    pub start_video_muted: bool,
}
