use std::fmt;

use serde::{Deserialize, Serialize};

/// Capture constraints for one video quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Declares the active video quality for a session.
///
/// Only one tier is active per session; the adaptive controller and explicit user
/// overrides are the only writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQualityTier {
    /// 1920×1080 at 30 fps.
    High,
    /// 1280×720 at 25 fps.
    Medium,
    /// 640×480 at 15 fps.
    Low,
}

impl VideoQualityTier {
    pub fn profile(self) -> VideoProfile {
        match self {
            VideoQualityTier::High => VideoProfile {
                width: 1920,
                height: 1080,
                frame_rate: 30,
            },
            VideoQualityTier::Medium => VideoProfile {
                width: 1280,
                height: 720,
                frame_rate: 25,
            },
            VideoQualityTier::Low => VideoProfile {
                width: 640,
                height: 480,
                frame_rate: 15,
            },
        }
    }
}

impl Default for VideoQualityTier {
    fn default() -> Self {
        VideoQualityTier::High
    }
}

impl fmt::Display for VideoQualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.profile();
        write!(f, "{}x{}@{}", p.width, p.height, p.frame_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_displays_its_profile() {
        assert_eq!(VideoQualityTier::default(), VideoQualityTier::High);
        assert_eq!(VideoQualityTier::Medium.to_string(), "1280x720@25");
    }
}
