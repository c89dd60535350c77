//! Worker 本地任务队列与执行池
//!
//! 收到的任务进入无界队列，固定数量的执行器共享队列接收端，队列为空时挂起等待。
//! 执行前先上报 `Started`，上报失败则不执行该任务。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskmesh_core::{
    models::{TaskStatus, UpdateTaskStatusRequest, WorkerSubmitRequest},
    SchedulerError, SchedulerResult,
};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::CoordinatorApi;
use crate::executors::TaskRunner;

#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: Uuid,
    pub data: String,
}

/// 执行计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    /// `Started` 上报失败而未执行的任务
    pub abandoned: u64,
}

/// 带重试的状态上报
pub struct StatusReporter {
    worker_id: String,
    coordinator: Arc<dyn CoordinatorApi>,
    retries: u32,
    retry_delay: Duration,
}

impl StatusReporter {
    pub fn new(
        worker_id: String,
        coordinator: Arc<dyn CoordinatorApi>,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            worker_id,
            coordinator,
            retries,
            retry_delay,
        }
    }

    /// 首次尝试之外最多重试 `retries` 次，退避按尝试次数线性增长；不可重试的错误立即返回
    ///
    /// 重试时收到 `InvalidTransition` 说明之前某次尝试已经写入，视为成功。
    pub async fn report(&self, task_id: Uuid, status: TaskStatus) -> SchedulerResult<()> {
        let request =
            UpdateTaskStatusRequest::new(task_id, status, Utc::now(), Some(self.worker_id.clone()));

        let mut attempt = 0;
        loop {
            match self.coordinator.update_task_status(&request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Status report {} for task {} failed (attempt {}/{}): {}",
                        status,
                        task_id,
                        attempt,
                        self.retries + 1,
                        e
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(SchedulerError::InvalidTransition { .. }) if attempt > 0 => {
                    info!(
                        "Status {} for task {} was already recorded by an earlier attempt",
                        status, task_id
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct TaskExecutionManager {
    worker_id: String,
    runner: Arc<dyn TaskRunner>,
    reporter: StatusReporter,
    pool_size: usize,
    sender: mpsc::UnboundedSender<QueuedTask>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    accepting: AtomicBool,
    received_task_ids: RwLock<Vec<Uuid>>,
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl TaskExecutionManager {
    pub fn new(
        worker_id: String,
        runner: Arc<dyn TaskRunner>,
        reporter: StatusReporter,
        pool_size: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            worker_id,
            runner,
            reporter,
            pool_size: pool_size.max(1),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            accepting: AtomicBool::new(true),
            received_task_ids: RwLock::new(Vec::new()),
            received: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Worker {} stopped accepting tasks", self.worker_id);
        }
    }

    /// 接收协调器下发的任务并放入本地队列
    pub async fn submit(&self, request: WorkerSubmitRequest) -> SchedulerResult<()> {
        if !self.is_accepting() {
            return Err(SchedulerError::ShuttingDown);
        }

        let task_id = request.task_id;
        self.sender
            .send(QueuedTask {
                task_id,
                data: request.data,
            })
            .map_err(|_| SchedulerError::ShuttingDown)?;

        self.received_task_ids.write().await.push(task_id);
        self.received.fetch_add(1, Ordering::SeqCst);
        debug!("Task {} queued on worker {}", task_id, self.worker_id);
        Ok(())
    }

    pub async fn received_task_ids(&self) -> Vec<Uuid> {
        self.received_task_ids.read().await.clone()
    }

    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            received: self.received.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }

    /// 启动 `pool_size` 个执行器；收到关闭信号后执行器做完手头的任务即退出
    pub fn start(self: &Arc<Self>, shutdown_rx: &broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        info!(
            "Starting {} executors for worker {}",
            self.pool_size, self.worker_id
        );
        (0..self.pool_size)
            .map(|index| {
                let manager = Arc::clone(self);
                let shutdown_rx = shutdown_rx.resubscribe();
                tokio::spawn(async move { manager.executor_loop(index, shutdown_rx).await })
            })
            .collect()
    }

    async fn executor_loop(&self, index: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => None,
                    task = receiver.recv() => task,
                }
            };

            let Some(task) = next else {
                debug!("Executor {} exiting", index);
                break;
            };
            self.process(task).await;
        }
    }

    async fn process(&self, task: QueuedTask) {
        if let Err(e) = self.reporter.report(task.task_id, TaskStatus::Started).await {
            error!(
                "Could not report start of task {}, skipping execution: {}",
                task.task_id, e
            );
            self.abandoned.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let status = match self.runner.run(task.task_id, &task.data).await {
            Ok(outcome) if outcome.success => TaskStatus::Completed,
            Ok(outcome) => {
                warn!(
                    "Task {} failed: {}",
                    task.task_id,
                    outcome.error_message.unwrap_or_default()
                );
                TaskStatus::Failed
            }
            Err(e) => {
                warn!("Task {} failed: {}", task.task_id, e);
                TaskStatus::Failed
            }
        };

        match status {
            TaskStatus::Completed => self.completed.fetch_add(1, Ordering::SeqCst),
            _ => self.failed.fetch_add(1, Ordering::SeqCst),
        };

        if let Err(e) = self.reporter.report(task.task_id, status).await {
            error!(
                "Could not report {} for task {}: {}",
                status, task.task_id, e
            );
        } else {
            info!("Task {} {}", task.task_id, status);
        }
    }
}
