use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{DueTask, StatusUpdateOutcome, TaskRecord, TaskStatus, WorkerRow};
use crate::SchedulerResult;

/// 任务存储
///
/// `picked_at`/`worker_id` 只由协调器的扫描写入，`started_at`/`completed_at`/`failed_at`
/// 只经由 [`TaskStore::record_status`] 写入。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 插入一个新任务（调度API的边界操作）
    async fn insert_task(
        &self,
        command: &str,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<TaskRecord>;

    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<TaskRecord>>;

    /// 按 `scheduled_at` 排序返回全部任务
    async fn list_tasks(&self) -> SchedulerResult<Vec<TaskRecord>>;

    /// 开启一次扫描事务：锁定 `scheduled_at < now + lookahead` 且未被认领的任务，
    /// 已被其他事务锁定的行直接跳过而不是等待。
    async fn begin_claim(&self, lookahead: Duration) -> SchedulerResult<Box<dyn ClaimBatch>>;

    /// 写入状态对应的时间戳列；每列至多写一次，终态列互斥。
    async fn record_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> SchedulerResult<StatusUpdateOutcome>;
}

/// 一次打开的扫描事务
///
/// 未提交就被丢弃的批次等同于回滚。
#[async_trait]
pub trait ClaimBatch: Send {
    /// 本次锁定的任务，按 `scheduled_at` 升序
    fn tasks(&self) -> &[DueTask];

    /// 在事务内记录认领：`picked_at = now()`，`worker_id = worker_id`
    async fn mark_claimed(&mut self, task_id: Uuid, worker_id: &str) -> SchedulerResult<()>;

    /// 提交事务，返回认领的任务数
    async fn commit(self: Box<Self>) -> SchedulerResult<usize>;

    async fn rollback(self: Box<Self>) -> SchedulerResult<()>;
}

/// `workers` 表的记账接口
#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn upsert_worker(&self, row: &WorkerRow) -> SchedulerResult<()>;

    async fn mark_worker_offline(&self, worker_id: &str) -> SchedulerResult<()>;

    async fn list_worker_rows(&self) -> SchedulerResult<Vec<WorkerRow>>;
}
