//! Local media devices: camera/microphone tracks for the peer link.
//!
//! The platform capture stack sits behind [`MediaDevices`]; the controller only
//! ever holds track handles and asks the device layer to stop them.
use async_trait::async_trait;
use thiserror::Error;

use crate::profile::VideoProfile;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("constraints rejected: {0}")]
    ConstraintsRejected(String),
    #[error("media unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    pub id: String,
    pub device_id: String,
    pub profile: VideoProfile,
}

/// Tracks captured for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub audio: Option<AudioTrack>,
    pub video: Option<VideoTrack>,
}

impl LocalMedia {
    pub fn track_ids(&self) -> Vec<String> {
        self.audio
            .iter()
            .map(|t| t.id.clone())
            .chain(self.video.iter().map(|t| t.id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoProfile>,
    /// Preferred camera; `None` lets the platform choose.
    pub camera: Option<String>,
}

/// Platform capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Opens camera and microphone for a call.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;

    /// Opens a single camera track, used for hot-swap and tier changes.
    async fn open_camera(
        &self,
        device_id: Option<&str>,
        profile: &VideoProfile,
    ) -> Result<VideoTrack, MediaError>;

    /// Stops a track. Stopping an unknown or already stopped track is a no-op.
    fn stop_track(&self, track_id: &str);

    fn release(&self, media: &LocalMedia) {
        for id in media.track_ids() {
            self.stop_track(&id);
        }
    }
}
