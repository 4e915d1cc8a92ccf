use std::fmt;

use thiserror::Error;

/// Lifecycle phase of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    Idle,
    /// Offer sent, waiting for the callee.
    Calling,
    /// Offer received, waiting for the local user.
    Receiving,
    /// Accepted, description exchange and ICE in progress.
    Connecting,
    Active,
    /// Teardown in progress.
    Ending,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: CallPhase, to: CallPhase },
    #[error("{action} not allowed while {phase}")]
    NotAllowed {
        action: &'static str,
        phase: CallPhase,
    },
    #[error("missing session data: {0}")]
    MissingData(&'static str),
}

impl CallPhase {
    /// Validates a phase change and returns the new phase.
    pub fn transition(self, next: CallPhase) -> Result<CallPhase, TransitionError> {
        use CallPhase::*;
        let allowed = matches!(
            (self, next),
            (Idle, Calling)
                | (Idle, Receiving)
                | (Receiving, Connecting)
                | (Calling, Active)
                | (Connecting, Active)
                | (Calling, Ending)
                | (Receiving, Ending)
                | (Connecting, Ending)
                | (Active, Ending)
                | (Ending, Idle)
        );
        if allowed {
            Ok(next)
        } else {
            Err(TransitionError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Phases in which the peer link may be carrying media or negotiating.
    pub fn has_link(self) -> bool {
        matches!(
            self,
            CallPhase::Calling | CallPhase::Connecting | CallPhase::Active
        )
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Idle => "idle",
            CallPhase::Calling => "calling",
            CallPhase::Receiving => "receiving",
            CallPhase::Connecting => "connecting",
            CallPhase::Active => "active",
            CallPhase::Ending => "ending",
        };
        f.write_str(name)
    }
}
