//! Connection quality monitoring.
//!
//! While a call is active a [`QualityMonitor`] polls the link statistics through a
//! read-only [`StatsProbe`], turns each interval into a [`QualitySample`], and
//! reports the classified [`QualityLevel`] to the call controller. The monitor
//! never touches the link itself; tier changes are executed by the controller
//! through the peer connection manager.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::peer::StatsProbe;

pub mod adaptive;
pub mod recovery;
pub mod sampler;

pub use adaptive::{decide_next_tier, AdaptiveController};
pub use recovery::{ReconnectDecision, ReconnectState};
pub use sampler::{QualitySample, StatsSampler};

const POOR_LOSS_PERCENT: f64 = 8.0;
const POOR_BITRATE_BPS: u64 = 200_000;
const FAIR_LOSS_PERCENT: f64 = 2.0;
const FAIR_BITRATE_BPS: u64 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityLevel {
    /// No complete interval measured yet.
    #[default]
    Unknown,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityLevel::Unknown => "unknown",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
        };
        f.write_str(name)
    }
}

/// Classifies one interval. Deterministic in its two inputs.
pub fn classify(loss_percent: f64, bitrate_bps: u64) -> QualityLevel {
    if loss_percent > POOR_LOSS_PERCENT || bitrate_bps < POOR_BITRATE_BPS {
        QualityLevel::Poor
    } else if loss_percent > FAIR_LOSS_PERCENT || bitrate_bps < FAIR_BITRATE_BPS {
        QualityLevel::Fair
    } else {
        QualityLevel::Good
    }
}

/// One poll result, tagged with the session it was measured for.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub session_id: Uuid,
    pub level: QualityLevel,
    pub sample: Option<QualitySample>,
}

/// Periodic statistics poller.
///
/// # Guarantees
/// * The first poll only primes the sampler and reports `Unknown`.
/// * `stop()` (or drop) cancels the task; no report is sent afterwards.
/// * Probe errors skip the tick rather than ending the monitor.
pub struct QualityMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl QualityMonitor {
    pub fn start(
        probe: Arc<dyn StatsProbe>,
        interval: Duration,
        session_id: Uuid,
        reports: mpsc::UnboundedSender<QualityReport>,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut sampler = StatsSampler::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(%session_id, interval_ms = interval.as_millis() as u64, "quality monitor started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let stats = match probe.stats().await {
                    Ok(stats) => stats,
                    Err(err) => {
                        debug!(%session_id, error = %err, "stats poll failed");
                        continue;
                    }
                };
                let sample = sampler.record(stats);
                let level = sample
                    .as_ref()
                    .map(|s| classify(s.loss_percent(), s.bitrate_bps))
                    .unwrap_or(QualityLevel::Unknown);
                trace!(%session_id, %level, "quality sample");
                if cancelled.is_cancelled() {
                    break;
                }
                let report = QualityReport {
                    session_id,
                    level,
                    sample,
                };
                if reports.send(report).is_err() {
                    break;
                }
            }
            debug!(%session_id, "quality monitor stopped");
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for QualityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{LinkStats, PeerError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify(0.0, 2_000_000), QualityLevel::Good);
        assert_eq!(classify(2.0, 500_000), QualityLevel::Good);
        assert_eq!(classify(2.1, 2_000_000), QualityLevel::Fair);
        assert_eq!(classify(0.0, 499_999), QualityLevel::Fair);
        assert_eq!(classify(8.0, 2_000_000), QualityLevel::Fair);
        assert_eq!(classify(8.5, 2_000_000), QualityLevel::Poor);
        assert_eq!(classify(0.0, 199_999), QualityLevel::Poor);
        assert_eq!(classify(3.0, 1_000_000), classify(3.0, 1_000_000));
    }

    struct SteppingProbe {
        reads: Mutex<u64>,
    }

    #[async_trait]
    impl StatsProbe for SteppingProbe {
        async fn stats(&self) -> Result<LinkStats, PeerError> {
            let mut reads = self.reads.lock();
            *reads += 1;
            Ok(LinkStats {
                at: tokio::time::Instant::now().into_std(),
                packets_sent: *reads * 1_000,
                packets_lost: *reads * 100,
                bytes_sent: *reads * 250_000,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn primes_then_reports_and_stops() {
        let probe = Arc::new(SteppingProbe {
            reads: Mutex::new(0),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut monitor = QualityMonitor::start(probe, Duration::from_secs(2), id, tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, QualityLevel::Unknown);
        assert!(first.sample.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.session_id, id);
        // 100 of 1000 lost: 10 %.
        assert_eq!(second.level, QualityLevel::Poor);
        assert_eq!(second.sample.unwrap().bitrate_bps, 1_000_000);

        monitor.stop();
        assert!(rx.recv().await.is_none());
    }
}
