//! Per-backend and per-service metrics.
//!
//! Counters are monotonic and atomically incremented off the write lane;
//! only an explicit admin reset zeroes them. Each backend keeps a bounded
//! ring of recent failures for the metrics API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Most recent failures kept per backend.
pub const FAILURE_RING_CAPACITY: usize = 20;

/// Upper bounds (ms) of the response-time histogram buckets; the last
/// bucket is unbounded.
pub const RT_BUCKET_BOUNDS_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000];

const BUCKET_COUNT: usize = RT_BUCKET_BOUNDS_MS.len() + 1;

/// One entry in the failure ring.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureRecord {
    /// RFC3339 timestamp.
    pub ts: String,
    /// Stable failure reason (`connect_error`, `timeout`, `status_503`, …).
    pub reason: String,
}

/// Monotonic counters for one backend.
#[derive(Debug)]
pub struct BackendMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_rt_ms: AtomicU64,
    rt_buckets: [AtomicU64; BUCKET_COUNT],
    last_failures: Mutex<VecDeque<FailureRecord>>,
}

/// Point-in-time view for the metrics API.
#[derive(Debug, Clone, Serialize)]
pub struct BackendMetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_rt_ms: f64,
    pub rt_histogram: Vec<u64>,
    pub last_failures: Vec<FailureRecord>,
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_rt_ms: AtomicU64::new(0),
            rt_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_failures: Mutex::new(VecDeque::with_capacity(FAILURE_RING_CAPACITY)),
        }
    }

    fn observe_rt(&self, rt_ms: u64) {
        self.total_rt_ms.fetch_add(rt_ms, Ordering::Relaxed);
        let bucket = RT_BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| rt_ms <= *bound)
            .unwrap_or(BUCKET_COUNT - 1);
        self.rt_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, rt_ms: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.observe_rt(rt_ms);
    }

    pub fn record_failure(&self, rt_ms: u64, ts: String, reason: String) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.observe_rt(rt_ms);

        let mut ring = self.last_failures.lock().unwrap();
        if ring.len() == FAILURE_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(FailureRecord { ts, reason });
    }

    /// Explicit admin reset; the only way counters go backwards.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.total_rt_ms.store(0, Ordering::Relaxed);
        for bucket in &self.rt_buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.last_failures.lock().unwrap().clear();
    }

    pub fn snapshot(&self) -> BackendMetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total_rt = self.total_rt_ms.load(Ordering::Relaxed);
        BackendMetricsSnapshot {
            requests,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_rt_ms: if requests > 0 {
                total_rt as f64 / requests as f64
            } else {
                0.0
            },
            rt_histogram: self
                .rt_buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            last_failures: self.last_failures.lock().unwrap().iter().cloned().collect(),
        }
    }
}

impl Default for BackendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Service-level bookkeeping next to the per-backend counters.
#[derive(Debug)]
pub struct ServiceMetrics {
    started_at_ms: u64,
    last_config_change_ms: AtomicU64,
    unknown_config_fields: AtomicU64,
}

impl ServiceMetrics {
    pub fn new(now_ms: u64) -> Self {
        Self {
            started_at_ms: now_ms,
            last_config_change_ms: AtomicU64::new(now_ms),
            unknown_config_fields: AtomicU64::new(0),
        }
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn config_changed(&self, now_ms: u64) {
        self.last_config_change_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_config_change_ms(&self) -> u64 {
        self.last_config_change_ms.load(Ordering::Relaxed)
    }

    pub fn warn_unknown_fields(&self, count: u64) {
        self.unknown_config_fields.fetch_add(count, Ordering::Relaxed);
    }

    pub fn unknown_config_fields(&self) -> u64 {
        self.unknown_config_fields.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_average() {
        let metrics = BackendMetrics::new();
        metrics.record_success(10);
        metrics.record_success(30);
        metrics.record_failure(20, "t1".to_string(), "status_503".to_string());

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.failures, 1);
        assert!((snap.avg_rt_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(snap.last_failures.len(), 1);
        assert_eq!(snap.last_failures[0].reason, "status_503");
    }

    #[test]
    fn failure_ring_is_bounded() {
        let metrics = BackendMetrics::new();
        for i in 0..(FAILURE_RING_CAPACITY + 5) {
            metrics.record_failure(1, format!("t{i}"), "timeout".to_string());
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.last_failures.len(), FAILURE_RING_CAPACITY);
        // Oldest entries were evicted.
        assert_eq!(snap.last_failures[0].ts, "t5");
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = BackendMetrics::new();
        metrics.record_success(10);
        metrics.record_failure(5, "t".to_string(), "timeout".to_string());
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 0);
        assert_eq!(snap.failures, 0);
        assert!(snap.last_failures.is_empty());
        assert!(snap.rt_histogram.iter().all(|b| *b == 0));
    }

    #[test]
    fn histogram_buckets_by_bound() {
        let metrics = BackendMetrics::new();
        metrics.record_success(3); // bucket 0 (<= 5)
        metrics.record_success(80); // bucket 4 (<= 100)
        metrics.record_success(60_000); // overflow bucket
        let snap = metrics.snapshot();
        assert_eq!(snap.rt_histogram[0], 1);
        assert_eq!(snap.rt_histogram[4], 1);
        assert_eq!(snap.rt_histogram[RT_BUCKET_BOUNDS_MS.len()], 1);
    }
}
