//! Structured logging utilities
//!
//! Every record carries an `event` field so log pipelines can filter on it.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskmesh_core::models::TaskStatus;

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_worker_registered(worker_id: &str, address: &str) {
        info!(
            event = "worker_registered",
            worker.id = worker_id,
            worker.address = address,
            "Worker registered"
        );
    }

    pub fn log_worker_evicted(worker_id: &str, address: &str, misses: u32) {
        warn!(
            event = "worker_evicted",
            worker.id = worker_id,
            worker.address = address,
            worker.heartbeat_misses = misses,
            "Worker evicted after missing heartbeats"
        );
    }

    pub fn log_task_claimed(task_id: Uuid, worker_id: &str, scheduled_at: DateTime<Utc>) {
        info!(
            event = "task_claimed",
            task.id = %task_id,
            task.scheduled_at = %scheduled_at,
            worker.id = worker_id,
            "Task claimed and dispatched"
        );
    }

    pub fn log_task_submitted(task_id: Uuid, worker_id: &str) {
        info!(
            event = "task_submitted",
            task.id = %task_id,
            worker.id = worker_id,
            "Task submitted directly"
        );
    }

    pub fn log_dispatch_failed(task_id: Uuid, worker_id: Option<&str>, error: &str) {
        error!(
            event = "dispatch_failed",
            task.id = %task_id,
            worker.id = worker_id.unwrap_or("-"),
            error = error,
            "Task dispatch failed"
        );
    }

    pub fn log_status_report(task_id: Uuid, status: TaskStatus, worker_id: Option<&str>) {
        debug!(
            event = "status_report",
            task.id = %task_id,
            task.status = %status,
            worker.id = worker_id.unwrap_or("-"),
            "Task status reported"
        );
    }

    pub fn log_scan_completed(selected: usize, claimed: usize, skipped: usize) {
        debug!(
            event = "scan_completed",
            scan.selected = selected,
            scan.claimed = claimed,
            scan.skipped = skipped,
            "Due-task scan completed"
        );
    }
}
