//! Raw audio uplink for live transcription.
//!
//! Microphone samples are regrouped into fixed frames, encoded to PCM16LE and
//! pushed to the signaling transport as `audioChunk` messages. The pipeline runs
//! beside the peer link and shares only the transport with the rest of the call.
//!
//! # Guarantees
//! * A frame is sent only while the transport reports connected; otherwise it is
//!   dropped and counted, never queued for later.
//! * Frames are encoded and sent in capture order by a single task. The
//!   processor still refuses to be re-entered: a frame handed to it while
//!   another is in flight is skipped.
//! * `stop()` may be called any number of times.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::media::MediaError;
use crate::messages::{AudioChunk, ClientMessage};
use crate::signal::{SignalError, SignalTransport};

pub mod capture;
pub mod pcm;

pub use capture::{open_with_fallback, AudioConstraints, CaptureStream, Microphone};
pub use pcm::{decode_pcm16le, encode_pcm16le, PcmFramer, FRAME_SAMPLES};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio capture: {0}")]
    Capture(#[from] MediaError),
    #[error("audio encoder: {0}")]
    Encoder(String),
}

/// Where frames are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStrategy {
    /// On the blocking pool, off the control thread. Needs a multi-thread runtime.
    Worklet,
    /// On the task that received the frame. Always available.
    Inline,
}

impl EncoderStrategy {
    pub fn is_supported(self) -> bool {
        match self {
            EncoderStrategy::Inline => true,
            EncoderStrategy::Worklet => Handle::try_current()
                .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
                .unwrap_or(false),
        }
    }

    /// First supported strategy in preference order.
    pub fn select(prefer_worklet: bool) -> Self {
        if prefer_worklet && EncoderStrategy::Worklet.is_supported() {
            EncoderStrategy::Worklet
        } else {
            EncoderStrategy::Inline
        }
    }

    async fn encode(self, samples: Vec<f32>) -> Result<Vec<u8>, AudioError> {
        match self {
            EncoderStrategy::Inline => Ok(encode_pcm16le(&samples)),
            EncoderStrategy::Worklet => tokio::task::spawn_blocking(move || encode_pcm16le(&samples))
                .await
                .map_err(|err| AudioError::Encoder(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub frames_sent: u64,
    pub frames_dropped_disconnected: u64,
    pub frames_skipped_in_flight: u64,
    pub frames_failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    DroppedDisconnected,
    SkippedInFlight,
    Failed,
}

/// Held while a frame is being encoded and sent.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Encodes and ships one frame at a time.
#[derive(Clone)]
pub struct FrameProcessor {
    transport: Arc<dyn SignalTransport>,
    strategy: EncoderStrategy,
    sample_rate: u32,
    in_flight: Arc<AtomicBool>,
    stats: Arc<Mutex<AudioStats>>,
}

impl FrameProcessor {
    pub fn new(transport: Arc<dyn SignalTransport>, strategy: EncoderStrategy, sample_rate: u32) -> Self {
        Self {
            transport,
            strategy,
            sample_rate,
            in_flight: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(AudioStats::default())),
        }
    }

    pub fn stats(&self) -> AudioStats {
        *self.stats.lock()
    }

    pub async fn process(&self, samples: Vec<f32>) -> FrameOutcome {
        let outcome = self.process_inner(samples).await;
        let mut stats = self.stats.lock();
        match outcome {
            FrameOutcome::Sent => stats.frames_sent += 1,
            FrameOutcome::DroppedDisconnected => stats.frames_dropped_disconnected += 1,
            FrameOutcome::SkippedInFlight => stats.frames_skipped_in_flight += 1,
            FrameOutcome::Failed => stats.frames_failed += 1,
        }
        outcome
    }

    async fn process_inner(&self, samples: Vec<f32>) -> FrameOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return FrameOutcome::SkippedInFlight;
        };
        if !self.transport.is_connected() {
            return FrameOutcome::DroppedDisconnected;
        }
        let chunk = match self.strategy.encode(samples).await {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "audio frame encode failed");
                return FrameOutcome::Failed;
            }
        };
        // The link may have dropped while encoding.
        if !self.transport.is_connected() {
            return FrameOutcome::DroppedDisconnected;
        }
        let msg = ClientMessage::AudioChunk(AudioChunk {
            chunk,
            sample_rate: self.sample_rate,
        });
        match self.transport.send(msg) {
            Ok(()) => FrameOutcome::Sent,
            Err(SignalError::NotConnected) | Err(SignalError::Closed) => {
                FrameOutcome::DroppedDisconnected
            }
            Err(err) => {
                debug!(error = %err, "audio frame not sent");
                FrameOutcome::Failed
            }
        }
    }
}

/// A running capture-to-transport pipeline.
pub struct AudioPipeline {
    mic: Arc<dyn Microphone>,
    track_id: String,
    sample_rate: u32,
    strategy: EncoderStrategy,
    processor: FrameProcessor,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Opens the microphone and starts framing.
    ///
    /// # Errors
    /// Returns [`AudioError::Capture`] when neither the enhanced nor the minimal
    /// capture request succeeds.
    pub async fn start(
        mic: Arc<dyn Microphone>,
        transport: Arc<dyn SignalTransport>,
        config: &AudioConfig,
    ) -> Result<Self, AudioError> {
        let (stream, constraints) = open_with_fallback(mic.as_ref(), config.sample_rate).await?;
        let strategy = EncoderStrategy::select(config.prefer_worklet);
        let CaptureStream {
            track_id,
            sample_rate,
            buffers,
        } = stream;
        info!(
            %track_id,
            sample_rate,
            ?strategy,
            enhanced = constraints.echo_cancellation,
            "audio pipeline started"
        );
        let processor = FrameProcessor::new(transport, strategy, sample_rate);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_pipeline(
            buffers,
            processor.clone(),
            config.frame_samples,
            token.clone(),
        ));
        Ok(Self {
            mic,
            track_id,
            sample_rate,
            strategy,
            processor,
            token,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> AudioStats {
        self.processor.stats()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn strategy(&self) -> EncoderStrategy {
        self.strategy
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops framing and closes the microphone.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.token.cancel();
        handle.abort();
        self.mic.close(&self.track_id).await;
        let stats = self.stats();
        info!(
            track_id = %self.track_id,
            sent = stats.frames_sent,
            dropped = stats.frames_dropped_disconnected,
            skipped = stats.frames_skipped_in_flight,
            "audio pipeline stopped"
        );
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_pipeline(
    mut buffers: mpsc::Receiver<Vec<f32>>,
    processor: FrameProcessor,
    frame_samples: usize,
    token: CancellationToken,
) {
    let mut framer = PcmFramer::new(frame_samples);
    loop {
        let buffer = tokio::select! {
            _ = token.cancelled() => break,
            buffer = buffers.recv() => buffer,
        };
        let Some(buffer) = buffer else {
            debug!("capture stream ended");
            break;
        };
        // Frames cut from one buffer go out in order, one after another.
        for frame in framer.push(&buffer) {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = processor.process(frame) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ChannelTransport;

    #[tokio::test]
    async fn frame_dropped_while_disconnected() {
        let (transport, mut rx) = ChannelTransport::new();
        let transport = Arc::new(transport);
        transport.set_connected(false);
        let processor = FrameProcessor::new(transport.clone(), EncoderStrategy::Inline, 16_000);
        assert_eq!(
            processor.process(vec![0.0; 8]).await,
            FrameOutcome::DroppedDisconnected
        );
        assert!(rx.try_recv().is_err());

        transport.set_connected(true);
        assert_eq!(processor.process(vec![1.0; 2]).await, FrameOutcome::Sent);
        match rx.try_recv().unwrap() {
            ClientMessage::AudioChunk(chunk) => {
                assert_eq!(chunk.sample_rate, 16_000);
                assert_eq!(chunk.chunk, vec![0xFF, 0x7F, 0xFF, 0x7F]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let stats = processor.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_dropped_disconnected, 1);
    }

    #[tokio::test]
    async fn overlapping_frame_is_skipped() {
        let (transport, mut rx) = ChannelTransport::new();
        let processor = FrameProcessor::new(Arc::new(transport), EncoderStrategy::Inline, 16_000);
        let held = InFlightGuard::acquire(&processor.in_flight).unwrap();
        assert_eq!(
            processor.process(vec![0.0; 4]).await,
            FrameOutcome::SkippedInFlight
        );
        drop(held);
        assert_eq!(processor.process(vec![0.0; 4]).await, FrameOutcome::Sent);
        assert!(rx.try_recv().is_ok());
        assert_eq!(processor.stats().frames_skipped_in_flight, 1);
    }

    #[tokio::test]
    async fn worklet_unsupported_on_current_thread_runtime() {
        assert!(!EncoderStrategy::Worklet.is_supported());
        assert_eq!(EncoderStrategy::select(true), EncoderStrategy::Inline);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worklet_encodes_off_thread() {
        assert_eq!(EncoderStrategy::select(true), EncoderStrategy::Worklet);
        let (transport, mut rx) = ChannelTransport::new();
        let processor = FrameProcessor::new(Arc::new(transport), EncoderStrategy::Worklet, 48_000);
        assert_eq!(processor.process(vec![-1.0]).await, FrameOutcome::Sent);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientMessage::AudioChunk(AudioChunk { chunk, sample_rate: 48_000 }) if chunk == vec![0x01, 0x80]
        ));
    }
}
