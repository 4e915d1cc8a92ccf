//! Bounded ICE-restart budget.
//!
//! Each link failure while a call is up consumes one attempt and yields the delay
//! to wait before restarting ICE. Once the budget is spent the failure is fatal.
//! A successful `Connected` transition refills the budget.
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Outcome of recording a link failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Restart ICE after `delay`; `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Already a retry waiting to fire; this failure adds nothing.
    AlreadyScheduled { attempt: u32 },
    /// Budget exhausted after `attempts` restarts.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectState {
    attempt_count: u32,
    max_attempts: u32,
    backoff: Vec<Duration>,
    scheduled: Option<u32>,
}

impl ReconnectState {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
            scheduled: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or_default()
    }

    pub fn on_failure(&mut self) -> ReconnectDecision {
        if let Some(attempt) = self.scheduled {
            return ReconnectDecision::AlreadyScheduled { attempt };
        }
        if self.attempt_count >= self.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempt_count,
            };
        }
        self.attempt_count += 1;
        let attempt = self.attempt_count;
        self.scheduled = Some(attempt);
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }

    /// Consumes the scheduled attempt when its timer fires.
    ///
    /// Returns false for a timer that no longer matches (reset or superseded).
    pub fn fire(&mut self, attempt: u32) -> bool {
        if self.scheduled == Some(attempt) {
            self.scheduled = None;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.scheduled = None;
    }
}
