//! Registration with the signaling server and the online roster.
use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ClientError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::signal::SignalTransport;

/// Who we are on the server and who else is online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    identity: String,
    roster: Vec<String>,
}

impl Presence {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            roster: Vec::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Other users currently online.
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Replaces the roster, leaving ourselves out. Returns whether it changed.
    pub fn update_roster(&mut self, users: Vec<String>) -> bool {
        let mut roster: Vec<String> = users
            .into_iter()
            .filter(|u| u != &self.identity)
            .collect();
        roster.dedup();
        if roster == self.roster {
            return false;
        }
        self.roster = roster;
        true
    }
}

/// Registers `identity` and waits for the server's verdict.
///
/// Messages that arrive before the verdict and are not part of it are handed back
/// in order so the caller can process them afterwards.
///
/// # Errors
/// * [`ClientError::Registration`] when the server refuses the name or it is empty.
/// * [`ClientError::Timeout`] when no verdict arrives within `timeout`.
/// * [`ClientError::Signal`] when the transport fails or closes first.
pub async fn register(
    transport: &dyn SignalTransport,
    inbound: &mut mpsc::Receiver<ServerMessage>,
    identity: &str,
    timeout: Duration,
) -> Result<(Presence, VecDeque<ServerMessage>), ClientError> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(ClientError::Registration("username required".into()));
    }
    transport.send(ClientMessage::RegisterUsername(identity.to_string()))?;
    debug!(%identity, "registration sent");

    let deadline = Instant::now() + timeout;
    let mut presence = Presence::new(identity);
    let mut backlog = VecDeque::new();
    loop {
        let msg = match tokio::time::timeout_at(deadline, inbound.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => return Err(ClientError::Signal(crate::signal::SignalError::Closed)),
            Err(_) => return Err(ClientError::Timeout("registration")),
        };
        match msg {
            ServerMessage::RegistrationSuccess(name) => {
                if name != identity {
                    warn!(requested = %identity, granted = %name, "server registered a different name");
                }
                presence.identity = name;
                info!(identity = %presence.identity, "registered");
                return Ok((presence, backlog));
            }
            ServerMessage::RegistrationFailed(reason) => {
                warn!(%identity, %reason, "registration refused");
                return Err(ClientError::Registration(reason));
            }
            ServerMessage::UpdateOnlineUsers(users) => {
                presence.update_roster(users);
            }
            other => backlog.push_back(other),
        }
    }
}
