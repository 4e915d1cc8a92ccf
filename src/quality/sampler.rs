//! Interval sampling of cumulative link counters.
//!
//! The link reports running totals. Each poll is diffed against the previous one
//! so loss and bitrate describe only the last interval, never the whole call.
use std::time::Instant;

use crate::peer::LinkStats;

/// Loss and throughput over one polling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySample {
    pub timestamp: Instant,
    pub packets_lost: u64,
    pub packets_sent: u64,
    pub bitrate_bps: u64,
}

impl QualitySample {
    /// `100 * lost / max(sent, 1)`.
    pub fn loss_percent(&self) -> f64 {
        100.0 * self.packets_lost as f64 / self.packets_sent.max(1) as f64
    }
}

#[derive(Debug, Default)]
pub struct StatsSampler {
    last: Option<LinkStats>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading. The first one only primes the sampler.
    ///
    /// Counters that go backwards (a new link after recovery) restart the
    /// baseline instead of producing a bogus sample.
    pub fn record(&mut self, stats: LinkStats) -> Option<QualitySample> {
        let prev = self.last.replace(stats)?;
        if stats.packets_sent < prev.packets_sent || stats.bytes_sent < prev.bytes_sent {
            return None;
        }
        let elapsed = stats.at.saturating_duration_since(prev.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let bytes = stats.bytes_sent - prev.bytes_sent;
        Some(QualitySample {
            timestamp: stats.at,
            packets_lost: stats.packets_lost.saturating_sub(prev.packets_lost),
            packets_sent: stats.packets_sent - prev.packets_sent,
            bitrate_bps: (bytes as f64 * 8.0 / elapsed).round() as u64,
        })
    }
}
