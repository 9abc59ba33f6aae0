use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::JobEvent;

/// Live counters for dispatch activity
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_removed: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,

    performance: Mutex<PerformanceMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            jobs_enqueued: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_removed: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
            performance: Mutex::new(PerformanceMetrics::new()),
        }
    }

    /// Update counters from a lifecycle event
    pub fn observe(&self, event: &JobEvent) {
        let counter = match event {
            JobEvent::Enqueued { .. } => &self.jobs_enqueued,
            JobEvent::Active { .. } => &self.jobs_started,
            JobEvent::Progress { delivery, .. } if delivery.success => &self.deliveries_succeeded,
            JobEvent::Progress { .. } => &self.deliveries_failed,
            JobEvent::Delayed { .. } => &self.jobs_retried,
            JobEvent::Completed { .. } => &self.jobs_completed,
            JobEvent::Failed { .. } => &self.jobs_failed,
            JobEvent::Removed { .. } => &self.jobs_removed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    /// Attempts handed to workers (a retried job counts once per attempt)
    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_removed(&self) -> u64 {
        self.jobs_removed.load(Ordering::Relaxed)
    }

    pub fn deliveries_succeeded(&self) -> u64 {
        self.deliveries_succeeded.load(Ordering::Relaxed)
    }

    pub fn deliveries_failed(&self) -> u64 {
        self.deliveries_failed.load(Ordering::Relaxed)
    }

    /// Record how long one attempt of a job took
    pub fn record_attempt_time(&self, duration: Duration) {
        self.performance.lock().record_attempt_time(duration);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.performance.lock().clone()
    }

    /// Current snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let performance = self.performance.lock();
        MetricsSnapshot {
            timestamp: Utc::now(),
            global: GlobalMetrics {
                jobs_enqueued: self.jobs_enqueued(),
                jobs_started: self.jobs_started(),
                jobs_completed: self.jobs_completed(),
                jobs_failed: self.jobs_failed(),
                jobs_retried: self.jobs_retried(),
                jobs_removed: self.jobs_removed(),
                deliveries_succeeded: self.deliveries_succeeded(),
                deliveries_failed: self.deliveries_failed(),
            },
            average_attempt_ms: performance.average_attempt_time().map(|d| d.num_milliseconds()),
            p95_attempt_ms: performance.percentile_attempt_time(95.0).map(|d| d.num_milliseconds()),
        }
    }
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Recent attempt durations
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    attempt_times: VecDeque<Duration>,
    last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            attempt_times: VecDeque::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn record_attempt_time(&mut self, duration: Duration) {
        self.attempt_times.push_back(duration);

        // Keep only last 1000 measurements
        if self.attempt_times.len() > 1000 {
            self.attempt_times.pop_front();
        }

        self.last_updated = Utc::now();
    }

    pub fn average_attempt_time(&self) -> Option<Duration> {
        if self.attempt_times.is_empty() {
            return None;
        }

        let total_ms: i64 = self.attempt_times.iter().map(|d| d.num_milliseconds()).sum();
        let avg_ms = total_ms / self.attempt_times.len() as i64;
        Some(Duration::milliseconds(avg_ms))
    }

    pub fn percentile_attempt_time(&self, percentile: f64) -> Option<Duration> {
        if self.attempt_times.is_empty() {
            return None;
        }

        let mut sorted: Vec<Duration> = self.attempt_times.iter().copied().collect();
        sorted.sort_by_key(|d| d.num_milliseconds());

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub average_attempt_ms: Option<i64>,
    pub p95_attempt_ms: Option<i64>,
}

/// Totals since the adapter was created
#[derive(Debug, Clone, Serialize)]
pub struct GlobalMetrics {
    pub jobs_enqueued: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_removed: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

impl GlobalMetrics {
    /// Share of finished jobs that completed
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.jobs_completed + self.jobs_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Share of enqueued jobs that needed at least one retry
    pub fn retry_rate(&self) -> f64 {
        if self.jobs_enqueued == 0 {
            0.0
        } else {
            (self.jobs_retried as f64 / self.jobs_enqueued as f64) * 100.0
        }
    }

    /// Share of individual recipient sends that succeeded
    pub fn delivery_success_rate(&self) -> f64 {
        let total = self.deliveries_succeeded + self.deliveries_failed;
        if total == 0 {
            100.0
        } else {
            (self.deliveries_succeeded as f64 / total as f64) * 100.0
        }
    }

    pub fn jobs_in_progress(&self) -> u64 {
        self.jobs_enqueued
            .saturating_sub(self.jobs_completed + self.jobs_failed + self.jobs_removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryReceipt, DeliveryResult, JobId};

    #[test]
    fn test_observe_events() {
        let metrics = LiveMetrics::new();
        let job_id = JobId::new();
        let at = Utc::now();

        metrics.observe(&JobEvent::Enqueued { job_id: job_id.clone(), recipients: 2, at });
        metrics.observe(&JobEvent::Progress {
            job_id: job_id.clone(),
            progress: 50,
            delivery: DeliveryResult::delivered("a@x.io", DeliveryReceipt::new("250 OK")),
            at,
        });
        metrics.observe(&JobEvent::Progress {
            job_id: job_id.clone(),
            progress: 100,
            delivery: DeliveryResult::failed("b@x.io", "refused"),
            at,
        });
        metrics.observe(&JobEvent::Completed { job_id, result: Vec::new(), at });

        assert_eq!(metrics.jobs_enqueued(), 1);
        assert_eq!(metrics.jobs_completed(), 1);
        assert_eq!(metrics.deliveries_succeeded(), 1);
        assert_eq!(metrics.deliveries_failed(), 1);
        assert_eq!(metrics.snapshot().global.delivery_success_rate(), 50.0);
    }

    #[test]
    fn test_performance_metrics() {
        let mut perf = PerformanceMetrics::new();

        perf.record_attempt_time(Duration::milliseconds(100));
        perf.record_attempt_time(Duration::milliseconds(200));
        perf.record_attempt_time(Duration::milliseconds(300));

        assert_eq!(perf.average_attempt_time().unwrap().num_milliseconds(), 200);
        assert_eq!(perf.percentile_attempt_time(50.0).unwrap().num_milliseconds(), 200);
    }

    #[test]
    fn test_global_metrics() {
        let global = GlobalMetrics {
            jobs_enqueued: 100,
            jobs_started: 110,
            jobs_completed: 80,
            jobs_failed: 10,
            jobs_retried: 5,
            jobs_removed: 5,
            deliveries_succeeded: 0,
            deliveries_failed: 0,
        };

        assert_eq!(global.success_rate(), 88.88888888888889); // 80/(80+10) * 100
        assert_eq!(global.retry_rate(), 5.0);
        assert_eq!(global.jobs_in_progress(), 5);
        assert_eq!(global.delivery_success_rate(), 100.0);
    }
}
