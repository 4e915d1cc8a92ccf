//! Peer link abstraction.
//!
//! The NAT traversal and media transport live in an external ICE-capable
//! library; this module defines the seam it plugs into ([`PeerLink`],
//! [`PeerLinkFactory`]) and the [`PeerConnectionManager`] that owns the single
//! live link for a call.
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::media::{LocalMedia, VideoTrack};
use crate::messages::{IceCandidate, SessionDescription};

pub mod manager;

pub use manager::PeerConnectionManager;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// A remote signal reached the link before the description exchange finished.
    #[error("signal applied before the peer link was ready")]
    SignalAppliedBeforeReady,
    #[error("no peer link")]
    NoLink,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("peer link closed")]
    Closed,
    #[error("stats unavailable: {0}")]
    Stats(String),
}

/// Native peer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Native ICE connection state, mirrored for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Events a link reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    ConnectionState(PeerConnectionState),
    IceState(IceConnectionState),
    LocalCandidate(IceCandidate),
    RemoteTrack { kind: String, id: String },
}

/// A [`PeerEvent`] tagged with the link that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub generation: u64,
    pub event: PeerEvent,
}

/// Event sink handed to a link when it is created.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn emit(&self, event: PeerEvent) {
        // The owner may already have moved on; nothing to do then.
        let _ = self.tx.send(LinkEvent {
            generation: self.generation,
            event,
        });
    }
}

/// Cumulative outbound video counters read from the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub at: Instant,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
}

/// Result of a video track substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSwap {
    /// The sender now carries the new track; nothing to signal.
    Replaced,
    /// The link could not swap in place and produced a fresh offer to send.
    Renegotiate(SessionDescription),
}

/// Read-only statistics access, the only part of the link the quality monitor sees.
#[async_trait]
pub trait StatsProbe: Send + Sync {
    async fn stats(&self) -> Result<LinkStats, PeerError>;
}

/// One native peer connection.
#[async_trait]
pub trait PeerLink: StatsProbe {
    /// Adds local tracks, creates an offer and sets it as local description.
    async fn create_offer(&self, media: &LocalMedia) -> Result<SessionDescription, PeerError>;

    /// Sets the remote offer, adds `media` if given, and returns the local answer.
    async fn accept_offer(
        &self,
        offer: &SessionDescription,
        media: Option<&LocalMedia>,
    ) -> Result<SessionDescription, PeerError>;

    async fn set_answer(&self, answer: &SessionDescription) -> Result<(), PeerError>;

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;

    /// Produces an ICE-restart offer.
    async fn restart_ice(&self) -> Result<SessionDescription, PeerError>;

    async fn replace_video_track(&self, track: &VideoTrack) -> Result<TrackSwap, PeerError>;

    async fn close(&self);
}

/// Builds links on demand.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    type Link: PeerLink + 'static;

    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: LinkEvents,
    ) -> Result<Self::Link, PeerError>;
}
