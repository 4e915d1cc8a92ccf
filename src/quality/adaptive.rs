//! Tier adaptation.
//!
//! [`decide_next_tier`] is the pure policy: a quality level plus the last sample
//! in, the tier to run at out. [`AdaptiveController`] wraps it with the state a
//! call needs (current tier, a pending change, the manual override hold).
use std::time::{Duration, Instant};

use super::sampler::QualitySample;
use super::QualityLevel;
use crate::profile::VideoQualityTier;

const UPGRADE_MAX_LOSS_PERCENT: f64 = 1.0;
const UPGRADE_MIN_BITRATE_BPS: u64 = 1_000_000;

/// One-step tier policy.
pub fn decide_next_tier(
    current: VideoQualityTier,
    level: QualityLevel,
    sample: Option<&QualitySample>,
) -> VideoQualityTier {
    use VideoQualityTier::*;
    match (level, current) {
        (QualityLevel::Poor, _) => Low,
        (QualityLevel::Fair, High) => Medium,
        (QualityLevel::Good, Low) => Medium,
        (QualityLevel::Good, Medium) => match sample {
            Some(s)
                if s.loss_percent() < UPGRADE_MAX_LOSS_PERCENT
                    && s.bitrate_bps > UPGRADE_MIN_BITRATE_BPS =>
            {
                High
            }
            _ => Medium,
        },
        _ => current,
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    tier: VideoQualityTier,
    initial: VideoQualityTier,
    hold: Duration,
    override_until: Option<Instant>,
}

impl AdaptiveController {
    pub fn new(initial: VideoQualityTier, hold: Duration) -> Self {
        Self {
            tier: initial,
            initial,
            hold,
            override_until: None,
        }
    }

    pub fn tier(&self) -> VideoQualityTier {
        self.tier
    }

    pub fn is_held(&self, now: Instant) -> bool {
        self.override_until.map(|until| now < until).unwrap_or(false)
    }

    /// Returns the tier the link should move to, if any.
    ///
    /// Nothing is proposed while a manual choice is being held. The caller
    /// reports success through [`AdaptiveController::commit`]; a failed
    /// switch leaves the current tier in place and the next poll retries.
    pub fn observe(
        &mut self,
        level: QualityLevel,
        sample: Option<&QualitySample>,
        now: Instant,
    ) -> Option<VideoQualityTier> {
        if self.is_held(now) {
            return None;
        }
        self.override_until = None;
        let next = decide_next_tier(self.tier, level, sample);
        (next != self.tier).then_some(next)
    }

    pub fn commit(&mut self, tier: VideoQualityTier) {
        self.tier = tier;
    }

    /// Records a user-selected tier and suppresses adaptation for the hold window.
    pub fn manual_override(&mut self, tier: VideoQualityTier, now: Instant) {
        self.tier = tier;
        self.override_until = Some(now + self.hold);
    }

    pub fn reset(&mut self) {
        self.tier = self.initial;
        self.override_until = None;
    }
}
