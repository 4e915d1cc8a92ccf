//! Peer-to-peer call session engine.
//!
//! Sets up, maintains and recovers a two-party audio/video call negotiated over a
//! signaling server, while streaming raw microphone audio through the same
//! signaling channel for live transcription.
//!
//! The pieces, leaves first:
//! * [`signal`]: typed duplex channel to the signaling server.
//! * [`peer`]: the peer link seam and the manager owning the call's single link.
//! * [`session`]: the call lifecycle as a pure transition function.
//! * [`quality`]: statistics polling, link classification, tier adaptation and
//!   the ICE-restart budget.
//! * [`audio`]: microphone capture, PCM16LE framing and the audio uplink.
//! * [`subtitles`]: the live subtitle buffer.
//! * [`sdk`]: the client that runs all of the above in one controller task.
//! * [`loopback`]: in-memory implementations of every platform seam.

pub mod audio;
pub mod config;
pub mod loopback;
pub mod media;
pub mod messages;
pub mod peer;
pub mod profile;
pub mod quality;
pub mod sdk;
pub mod session;
pub mod signal;
pub mod subtitles;

pub use audio::{AudioPipeline, AudioStats, EncoderStrategy, Microphone};
pub use config::{CallConfig, ConfigError, IceServer};
pub use media::{LocalMedia, MediaDevices, MediaError};
pub use messages::{ClientMessage, IceCandidate, ServerMessage, SessionDescription, SignalData};
pub use peer::{PeerConnectionManager, PeerConnectionState, PeerError, PeerLink, PeerLinkFactory};
pub use profile::{VideoProfile, VideoQualityTier};
pub use quality::{classify, QualityLevel, QualityMonitor, QualitySample};
pub use sdk::{CallClient, CallCommand, CallEvent, CallHandle, ClientError};
pub use session::{CallEffect, CallInput, CallMachine, CallNotice, CallPhase, CallRole, TransitionError};
pub use signal::{SignalError, SignalTransport, WsSignalTransport};
pub use subtitles::{SubtitleBuffer, SubtitleEntry};
