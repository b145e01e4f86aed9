//! Round timing statistics.
//!
//! A fixed-size ring buffer of round durations plus running min/max/sum,
//! updated while the round counter lock is held.

use serde::Serialize;
use std::time::Duration;

/// Stress round durations with a ring buffer for percentiles.
#[derive(Debug)]
pub struct RoundMetrics {
    /// Ring buffer of round durations in milliseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total rounds recorded.
    total_rounds: u64,
    min_ms: u64,
    max_ms: u64,
    sum_ms: u64,
}

impl RoundMetrics {
    /// Create a collector retaining up to `histogram_size` samples.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_rounds: 0,
            min_ms: u64::MAX,
            max_ms: 0,
            sum_ms: 0,
        }
    }

    /// Record the duration of one round in milliseconds.
    pub fn record_ms(&mut self, ms: u64) {
        self.samples[self.write_pos] = ms;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_rounds += 1;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.sum_ms = self.sum_ms.saturating_add(ms);
    }

    /// Get total number of rounds recorded.
    #[must_use]
    pub fn total_rounds(&self) -> u64 {
        self.total_rounds
    }

    /// Shortest observed round.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_rounds > 0).then(|| Duration::from_millis(self.min_ms))
    }

    /// Longest observed round.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_rounds > 0).then(|| Duration::from_millis(self.max_ms))
    }

    /// Mean round duration.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_rounds > 0).then(|| Duration::from_millis(self.sum_ms / self.total_rounds))
    }

    /// Compute a percentile (0.0 to 100.0) from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles(&[percentile]).first().map(|&(_, d)| d)
    }

    /// Compute several percentiles with a single sort.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|&&p| (0.0..=100.0).contains(&p))
            .map(|&p| {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                let idx = idx.min(sorted.len() - 1);
                (p, Duration::from_millis(sorted[idx]))
            })
            .collect()
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let recorded = self.total_rounds > 0;
        MetricsSnapshot {
            total_rounds: self.total_rounds,
            min_ms: recorded.then_some(self.min_ms),
            max_ms: recorded.then_some(self.max_ms),
            mean_ms: recorded.then(|| self.sum_ms / self.total_rounds),
            sample_count: self.sample_count,
        }
    }
}

/// Immutable snapshot of round metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total rounds recorded.
    pub total_rounds: u64,
    /// Shortest round in milliseconds.
    pub min_ms: Option<u64>,
    /// Longest round in milliseconds.
    pub max_ms: Option<u64>,
    /// Mean round in milliseconds.
    pub mean_ms: Option<u64>,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

impl MetricsSnapshot {
    /// Spread between the slowest and fastest round.
    #[must_use]
    pub fn jitter_ms(&self) -> Option<u64> {
        match (self.min_ms, self.max_ms) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_recording() {
        let mut metrics = RoundMetrics::new(100);

        metrics.record_ms(500);
        metrics.record_ms(600);
        metrics.record_ms(550);

        assert_eq!(metrics.total_rounds(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_millis(500)));
        assert_eq!(metrics.max(), Some(Duration::from_millis(600)));
        assert_eq!(metrics.mean(), Some(Duration::from_millis(550)));
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = RoundMetrics::new(10);
        assert!(metrics.min().is_none());
        assert!(metrics.mean().is_none());
        assert!(metrics.percentile(50.0).is_none());
        assert_eq!(metrics.snapshot().jitter_ms(), None);
    }

    #[test]
    fn test_percentile_calculation() {
        let mut metrics = RoundMetrics::new(100);
        for i in 1..=100 {
            metrics.record_ms(i);
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!(p50.as_millis() >= 49 && p50.as_millis() <= 51);

        let p99 = metrics.percentile(99.0).unwrap();
        assert!(p99.as_millis() >= 98 && p99.as_millis() <= 100);
    }

    #[test]
    fn test_ring_buffer_wrapping() {
        let mut metrics = RoundMetrics::new(10);
        for i in 0..25 {
            metrics.record_ms(i);
        }

        assert_eq!(metrics.total_rounds(), 25);
        assert_eq!(metrics.snapshot().sample_count, 10);
        // Only the last ten rounds (15..=24) remain in the buffer
        assert_eq!(metrics.percentile(0.0), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_invalid_percentiles_skipped() {
        let mut metrics = RoundMetrics::new(100);
        for i in 1..=10 {
            metrics.record_ms(i);
        }

        let results = metrics.percentiles(&[-10.0, 50.0, 150.0, 99.0, f64::NAN]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 50.0);
        assert_eq!(results[1].0, 99.0);
    }

    #[test]
    fn test_snapshot() {
        let mut metrics = RoundMetrics::new(100);
        metrics.record_ms(400);
        metrics.record_ms(600);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_rounds, 2);
        assert_eq!(snap.min_ms, Some(400));
        assert_eq!(snap.max_ms, Some(600));
        assert_eq!(snap.mean_ms, Some(500));
        assert_eq!(snap.jitter_ms(), Some(200));
    }
}
