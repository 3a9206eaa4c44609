//! Sliding-window throughput estimator (spec §4.C), fed by byte-count
//! samples from every completed request. Used by the coordinator and the
//! trie healer for pacing.
//!
//! Grounded on the teacher's `sync/metrics.rs` `PeerMetrics`, but traded
//! its lifetime-cumulative atomics for a pruned FIFO window since the
//! spec wants a moving-window rate, not an all-time total.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct BandwidthEstimator {
    window: Duration,
    samples: Mutex<VecDeque<(u64, Instant)>>,
}

impl BandwidthEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a sample and prunes anything older than the window.
    pub async fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().await;
        samples.push_back((bytes, now));
        Self::prune(&mut samples, self.window, now);
    }

    /// Bytes per second averaged over the current window, or `0.0` if
    /// fewer than two samples remain inside it.
    pub async fn estimate(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples.lock().await;
        Self::prune(&mut samples, self.window, now);
        if samples.len() < 2 {
            return 0.0;
        }
        let total_bytes: u64 = samples.iter().map(|(bytes, _)| bytes).sum();
        let first = samples.front().expect("len >= 2").1;
        let last = samples.back().expect("len >= 2").1;
        let elapsed = last.duration_since(first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        total_bytes as f64 / elapsed
    }

    fn prune(samples: &mut VecDeque<(u64, Instant)>, window: Duration, now: Instant) {
        while let Some(&(_, ts)) = samples.front() {
            if now.duration_since(ts) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fewer_than_two_samples_returns_zero() {
        let estimator = BandwidthEstimator::new(Duration::from_secs(10));
        assert_eq!(estimator.estimate().await, 0.0);
        estimator.record(1000).await;
        assert_eq!(estimator.estimate().await, 0.0);
    }

    #[tokio::test]
    async fn two_samples_give_a_nonzero_rate() {
        let estimator = BandwidthEstimator::new(Duration::from_secs(10));
        estimator.record(1000).await;
        tokio::time::pause();
        tokio::time::advance(Duration::from_millis(500)).await;
        estimator.record(1000).await;
        let rate = estimator.estimate().await;
        assert!(rate > 0.0);
    }

    #[tokio::test]
    async fn samples_older_than_window_are_pruned() {
        let estimator = BandwidthEstimator::new(Duration::from_millis(50));
        tokio::time::pause();
        estimator.record(1000).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        estimator.record(1000).await;
        // The first sample fell out of the window before the second
        // arrived, so we're back down to one live sample.
        assert_eq!(estimator.estimate().await, 0.0);
    }
}
