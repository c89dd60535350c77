//! Metrics collector for the coordinator
//!
//! Handles are registered against whatever `metrics` recorder is installed;
//! without a recorder every update is a no-op.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use taskmesh_core::models::TaskStatus;
use tracing::debug;

/// Metrics collector for the coordinator
pub struct MetricsCollector {
    tasks_claimed_total: Counter,
    tasks_skipped_total: Counter,
    direct_submissions_total: Counter,
    dispatch_failures_total: Counter,
    scan_duration: Histogram,

    worker_registrations_total: Counter,
    worker_evictions_total: Counter,
    registered_workers: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_claimed_total: counter!("taskmesh_tasks_claimed_total"),
            tasks_skipped_total: counter!("taskmesh_tasks_skipped_total"),
            direct_submissions_total: counter!("taskmesh_direct_submissions_total"),
            dispatch_failures_total: counter!("taskmesh_dispatch_failures_total"),
            scan_duration: histogram!("taskmesh_scan_duration_seconds"),
            worker_registrations_total: counter!("taskmesh_worker_registrations_total"),
            worker_evictions_total: counter!("taskmesh_worker_evictions_total"),
            registered_workers: gauge!("taskmesh_registered_workers"),
        }
    }

    // Scan metrics

    /// Record one finished scan pass
    pub fn record_scan(&self, claimed: usize, skipped: usize, duration_seconds: f64) {
        self.tasks_claimed_total.increment(claimed as u64);
        self.tasks_skipped_total.increment(skipped as u64);
        self.scan_duration.record(duration_seconds);

        debug!(
            claimed = claimed,
            skipped = skipped,
            duration_seconds = duration_seconds,
            "Scan pass recorded"
        );
    }

    pub fn record_direct_submission(&self) {
        self.direct_submissions_total.increment(1);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures_total.increment(1);
    }

    /// Count a status report by its status label
    pub fn record_status_report(&self, status: TaskStatus) {
        counter!("taskmesh_status_reports_total", "status" => status.to_string()).increment(1);
    }

    // Worker metrics

    pub fn record_worker_registered(&self, registered: usize) {
        self.worker_registrations_total.increment(1);
        self.registered_workers.set(registered as f64);
    }

    pub fn record_workers_evicted(&self, evicted: usize, registered: usize) {
        self.worker_evictions_total.increment(evicted as u64);
        self.registered_workers.set(registered as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_without_recorder_are_noops() {
        let metrics = MetricsCollector::new();
        metrics.record_scan(2, 1, 0.01);
        metrics.record_dispatch_failure();
        metrics.record_status_report(TaskStatus::Completed);
        metrics.record_worker_registered(1);
        metrics.record_workers_evicted(1, 0);
    }
}
