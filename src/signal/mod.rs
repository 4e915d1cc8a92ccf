//! Duplex channel to the signaling server.
//!
//! Outbound messages go through [`SignalTransport::send`], which only enqueues and
//! never blocks the control loop. Inbound messages arrive on the
//! `mpsc::Receiver<ServerMessage>` handed out when the transport is created; the
//! receiver ending means the transport is gone.
//!
//! # Server contract
//! Every message except `audioChunk` is a JSON text frame `{ "event", "data" }`.
//! `audioChunk` is the only binary frame on the socket: the sample rate as a u32
//! little-endian prefix followed by the PCM16LE payload (see
//! [`AudioChunk::to_frame`](crate::messages::AudioChunk::to_frame)). The server
//! recognises it by the frame type alone, so the event name is not repeated.
use thiserror::Error;

use crate::messages::ClientMessage;

pub mod transport;

pub use transport::{ChannelTransport, WsSignalTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("signaling transport not connected")]
    NotConnected,
    #[error("signaling send queue full")]
    Backpressure,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("signaling transport closed")]
    Closed,
}

/// Outbound half of the signaling channel.
pub trait SignalTransport: Send + Sync {
    /// Queues a message for delivery.
    ///
    /// Fails with [`SignalError::NotConnected`] while the channel is down; callers
    /// never get a buffered send that would be replayed after reconnecting.
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError>;

    /// Whether the channel to the server is currently live.
    fn is_connected(&self) -> bool;
}
