//! High-level call client.
//!
//! [`CallClient`] registers with the signaling server and then runs the call
//! controller: one task that owns the state machine, the peer link, the audio
//! pipeline and the quality monitor. The UI drives it through a [`CallHandle`]
//! and observes it through a stream of [`CallEvent`]s.
use std::fmt;

use crate::config::ConfigError;
use crate::signal::SignalError;

pub mod client;
pub mod presence;

pub use client::{CallClient, CallCommand, CallEvent, CallHandle};
pub use presence::{register, Presence};

/// Errors surfaced at the client boundary.
#[derive(Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The server refused the username. Not retried.
    Registration(String),
    /// Signaling transport failure, including the channel closing.
    Signal(SignalError),
    Config(ConfigError),
    /// A bounded wait ran out.
    Timeout(&'static str),
    /// The client task is gone.
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Registration(reason) => write!(f, "registration failed: {}", reason),
            ClientError::Signal(err) => write!(f, "signaling error: {}", err),
            ClientError::Config(err) => write!(f, "config error: {}", err),
            ClientError::Timeout(what) => write!(f, "timed out waiting for {}", what),
            ClientError::Closed => f.write_str("call client closed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<SignalError> for ClientError {
    fn from(err: SignalError) -> Self {
        ClientError::Signal(err)
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err)
    }
}
