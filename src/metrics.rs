use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-window latency tracker with nearest-rank percentile queries
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<Duration>>>,
    window: usize,
}

impl PercentileTracker {
    pub fn new(window: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window))),
            window,
        }
    }

    /// Record one latency sample, evicting the oldest when the window is
    /// full
    pub fn record(&self, sample: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn p50(&self) -> Duration {
        self.percentile(0.50)
    }

    pub fn p95(&self) -> Duration {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> Duration {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<_> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let rank = ((sorted.len() as f64 * p).ceil() as usize).max(1);
        sorted[rank - 1]
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

fn as_micros_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000_000.0
}

/// Counters shared between a running stage and outside observers.
///
/// All fields sit behind `Arc`, so a clone taken before the stage starts
/// keeps reporting while (and after) the stage runs.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Items that made it through the transform (and publish, if any)
    items_processed: Arc<AtomicU64>,
    /// Publish attempts that came back full and had to be retried
    publish_retries: Arc<AtomicU64>,
    /// Take attempts that timed out with nothing available
    idle_polls: Arc<AtomicU64>,
    /// Per-item latency from take to publish/sink
    latency: PercentileTracker,
    started_at: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            items_processed: Arc::new(AtomicU64::new(0)),
            publish_retries: Arc::new(AtomicU64::new(0)),
            idle_polls: Arc::new(AtomicU64::new(0)),
            latency: PercentileTracker::new(1024),
            started_at: Instant::now(),
        }
    }

    pub fn record_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_retry(&self) {
        self.publish_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_poll(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latency.record(latency);
    }

    pub fn total_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    pub fn total_publish_retries(&self) -> u64 {
        self.publish_retries.load(Ordering::Relaxed)
    }

    pub fn total_idle_polls(&self) -> u64 {
        self.idle_polls.load(Ordering::Relaxed)
    }

    /// Items per second since the stage was constructed
    pub fn throughput(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_processed: self.total_processed(),
            publish_retries: self.total_publish_retries(),
            idle_polls: self.total_idle_polls(),
            throughput: self.throughput(),
            latency_p50_us: as_micros_f64(self.latency.p50()),
            latency_p95_us: as_micros_f64(self.latency.p95()),
            latency_p99_us: as_micros_f64(self.latency.p99()),
            elapsed: self.started_at.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a stage's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub items_processed: u64,
    pub publish_retries: u64,
    pub idle_polls: u64,
    pub throughput: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn format(&self) -> String {
        format!(
            "processed: {}, publish retries: {}, idle polls: {}, throughput: {:.2} items/s, \
             latency p50: {:.2}µs, p95: {:.2}µs, p99: {:.2}µs, elapsed: {:.2}s",
            self.items_processed,
            self.publish_retries,
            self.idle_polls,
            self.throughput,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_ordering() {
        let tracker = PercentileTracker::new(16);
        for i in 1..=16 {
            tracker.record(Duration::from_micros(i));
        }
        assert_eq!(tracker.p50(), Duration::from_micros(8));
        assert!(tracker.p99() >= tracker.p50());
    }

    #[test]
    fn test_window_eviction() {
        let tracker = PercentileTracker::new(4);
        for i in 0..10 {
            tracker.record(Duration::from_nanos(i));
        }
        assert_eq!(tracker.count(), 4);
    }

    #[test]
    fn test_stage_metrics_counters() {
        let metrics = StageMetrics::new();
        let observer = metrics.clone();
        for _ in 0..50 {
            metrics.record_processed();
            metrics.record_latency(Duration::from_micros(2));
        }
        metrics.record_publish_retry();
        assert_eq!(observer.total_processed(), 50);
        assert_eq!(observer.total_publish_retries(), 1);
        assert!(observer.throughput() > 0.0);
        assert!(observer.snapshot().format().contains("processed: 50"));
    }
}
