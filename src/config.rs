use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::VideoQualityTier;

/// Errors produced while loading or validating a [`CallConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// STUN/TURN server handed to the peer-connection library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested capture rate. The rate actually granted travels with every chunk.
    pub sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_samples: usize,
    /// Try the off-thread encoder before the inline one.
    pub prefer_worklet: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: crate::audio::pcm::FRAME_SAMPLES,
            prefer_worklet: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub poll_interval_ms: u64,
    pub initial_tier: VideoQualityTier,
    /// How long a manual tier choice suppresses automatic adaptation.
    pub manual_override_hold_ms: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            initial_tier: VideoQualityTier::High,
            manual_override_hold_ms: 10_000,
        }
    }
}

impl QualityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn manual_override_hold(&self) -> Duration {
        Duration::from_millis(self.manual_override_hold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    /// Delay before each ICE restart; the last entry repeats.
    pub backoff_ms: Vec<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![2_000, 5_000],
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            capacity: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub source_language: String,
    pub target_language: String,
    pub stt_source_languages: Vec<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            source_language: "en-US".into(),
            target_language: "es".into(),
            stt_source_languages: vec!["en-US".into(), "he-IL".into()],
        }
    }
}

/// Runtime configuration for a [`crate::sdk::CallClient`].
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let cfg = livecall::CallConfig::from_json_str(r#"{"ring_timeout_ms": 30000}"#).unwrap();
/// assert_eq!(cfg.reconnect.max_attempts, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<IceServer>,
    pub audio: AudioConfig,
    pub quality: QualityConfig,
    pub reconnect: ReconnectConfig,
    pub subtitles: SubtitleConfig,
    pub languages: LanguageConfig,
    /// A caller that hears nothing back within this window gives up.
    pub ring_timeout_ms: u64,
    pub registration_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:5000/signal".into(),
            ice_servers: (0..5)
                .map(|idx| {
                    let host = if idx == 0 {
                        "stun".to_string()
                    } else {
                        format!("stun{idx}")
                    };
                    IceServer::stun(format!("stun:{host}.l.google.com:19302"))
                })
                .collect(),
            audio: AudioConfig::default(),
            quality: QualityConfig::default(),
            reconnect: ReconnectConfig::default(),
            subtitles: SubtitleConfig::default(),
            languages: LanguageConfig::default(),
            ring_timeout_ms: 45_000,
            registration_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl CallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: CallConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be > 0".into()));
        }
        if self.audio.frame_samples == 0 {
            return Err(ConfigError::Invalid("audio.frame_samples must be > 0".into()));
        }
        if self.quality.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "quality.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.reconnect.max_attempts > 0 && self.reconnect.backoff_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "reconnect.backoff_ms needs at least one delay".into(),
            ));
        }
        if self.subtitles.capacity == 0 {
            return Err(ConfigError::Invalid("subtitles.capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
