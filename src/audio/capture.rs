//! Microphone capture seam.
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::media::MediaError;

/// Capture request sent to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub sample_rate: Option<u32>,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioConstraints {
    /// Mono at `sample_rate` with the voice processing chain enabled.
    pub fn enhanced(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channel_count: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    /// Any mono audio the platform can give.
    pub fn minimal() -> Self {
        Self {
            sample_rate: None,
            channel_count: 1,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

/// An open microphone.
///
/// `buffers` yields mono float samples in `[-1, 1]` at `sample_rate`, which is
/// the rate actually granted and may differ from the one requested.
#[derive(Debug)]
pub struct CaptureStream {
    pub track_id: String,
    pub sample_rate: u32,
    pub buffers: mpsc::Receiver<Vec<f32>>,
}

#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self, constraints: &AudioConstraints) -> Result<CaptureStream, MediaError>;

    /// Stops the capture track. Unknown ids are ignored.
    async fn close(&self, track_id: &str);
}

/// Opens with the enhanced request first and falls back to a minimal one when the
/// platform rejects the constraints. Any other error is returned as is.
pub async fn open_with_fallback(
    mic: &dyn Microphone,
    sample_rate: u32,
) -> Result<(CaptureStream, AudioConstraints), MediaError> {
    let enhanced = AudioConstraints::enhanced(sample_rate);
    match mic.open(&enhanced).await {
        Ok(stream) => Ok((stream, enhanced)),
        Err(MediaError::ConstraintsRejected(reason)) => {
            warn!(%reason, "enhanced audio constraints rejected; retrying minimal");
            let minimal = AudioConstraints::minimal();
            let stream = mic.open(&minimal).await?;
            info!(sample_rate = stream.sample_rate, "capturing with minimal constraints");
            Ok((stream, minimal))
        }
        Err(err) => Err(err),
    }
}
