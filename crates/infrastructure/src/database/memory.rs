//! 进程内存储
//!
//! 与PostgreSQL实现保持相同语义，行锁用一个已锁定ID集合模拟，
//! 并发的扫描批次互相跳过对方锁定的任务。用于嵌入式部署和测试。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskmesh_core::{
    models::{DueTask, StatusUpdateOutcome, TaskRecord, TaskStatus, WorkerRow, WorkerStatus},
    traits::{ClaimBatch, TaskStore, WorkerStore},
    SchedulerError, SchedulerResult,
};
use tracing::debug;
use uuid::Uuid;

const ROW_LOCK_POLL: Duration = Duration::from_millis(5);
const ROW_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct MemoryState {
    tasks: Vec<TaskRecord>,
    locked: HashSet<Uuid>,
    workers: BTreeMap<String, WorkerRow>,
}

impl MemoryState {
    fn task_mut(&mut self, id: Uuid) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> SchedulerResult<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| SchedulerError::Internal("内存存储锁已中毒".to_string()))
}

/// 内存任务/Worker存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 与PostgreSQL一样，行被未提交的扫描批次锁定时阻塞到批次结束
    async fn wait_for_row(&self, task_id: Uuid) -> SchedulerResult<MutexGuard<'_, MemoryState>> {
        let deadline = tokio::time::Instant::now() + ROW_LOCK_TIMEOUT;
        loop {
            {
                let state = lock_state(&self.state)?;
                if !state.locked.contains(&task_id) {
                    return Ok(state);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SchedulerError::DatabaseOperation(format!(
                    "等待任务 {task_id} 行锁超时"
                )));
            }
            tokio::time::sleep(ROW_LOCK_POLL).await;
        }
    }

    /// 当前被扫描事务锁定的任务数
    pub fn locked_count(&self) -> usize {
        lock_state(&self.state)
            .map(|state| state.locked.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(
        &self,
        command: &str,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<TaskRecord> {
        let task = TaskRecord::new(command, scheduled_at);
        lock_state(&self.state)?.tasks.push(task.clone());
        debug!("创建任务成功: {} (scheduled_at={})", task.id, task.scheduled_at);
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<TaskRecord>> {
        let state = lock_state(&self.state)?;
        Ok(state.tasks.iter().find(|task| task.id == id).cloned())
    }

    async fn list_tasks(&self) -> SchedulerResult<Vec<TaskRecord>> {
        let mut tasks = lock_state(&self.state)?.tasks.clone();
        tasks.sort_by_key(|task| task.scheduled_at);
        Ok(tasks)
    }

    async fn begin_claim(&self, lookahead: Duration) -> SchedulerResult<Box<dyn ClaimBatch>> {
        let lookahead = chrono::Duration::from_std(lookahead)
            .map_err(|e| SchedulerError::Internal(format!("无效的扫描窗口: {e}")))?;
        let cutoff = Utc::now() + lookahead;

        let mut state = lock_state(&self.state)?;
        let mut tasks: Vec<DueTask> = state
            .tasks
            .iter()
            .filter(|task| task.is_due(cutoff) && !state.locked.contains(&task.id))
            .map(|task| DueTask {
                id: task.id,
                command: task.command.clone(),
                scheduled_at: task.scheduled_at,
            })
            .collect();
        tasks.sort_by_key(|task| task.scheduled_at);

        for task in &tasks {
            state.locked.insert(task.id);
        }
        drop(state);

        debug!("锁定待认领任务 {} 个", tasks.len());
        Ok(Box::new(MemoryClaimBatch {
            state: Arc::clone(&self.state),
            tasks,
            staged: Vec::new(),
            finished: false,
        }))
    }

    async fn record_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> SchedulerResult<StatusUpdateOutcome> {
        let mut state = self.wait_for_row(task_id).await?;
        let Some(task) = state.task_mut(task_id) else {
            return Ok(StatusUpdateOutcome::Untracked);
        };

        let terminal_set = task.completed_at.is_some() || task.failed_at.is_some();
        // 未认领的任务不接受状态
        let allowed = task.picked_at.is_some()
            && match status {
                TaskStatus::Started => task.started_at.is_none() && !terminal_set,
                TaskStatus::Completed | TaskStatus::Failed => !terminal_set,
            };
        if !allowed {
            return Err(SchedulerError::InvalidTransition { task_id, status });
        }

        let floor = match status {
            TaskStatus::Started => task.picked_at,
            TaskStatus::Completed | TaskStatus::Failed => task.started_at.or(task.picked_at),
        };
        let at = floor.map_or(at, |floor| at.max(floor));

        match status {
            TaskStatus::Started => task.started_at = Some(at),
            TaskStatus::Completed => task.completed_at = Some(at),
            TaskStatus::Failed => task.failed_at = Some(at),
        }
        if task.worker_id.is_none() {
            task.worker_id = worker_id.map(str::to_string);
        }

        debug!("任务 {} 写入状态 {}", task_id, status);
        Ok(StatusUpdateOutcome::Applied)
    }
}

#[async_trait]
impl WorkerStore for InMemoryStore {
    async fn upsert_worker(&self, worker: &WorkerRow) -> SchedulerResult<()> {
        lock_state(&self.state)?
            .workers
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn mark_worker_offline(&self, worker_id: &str) -> SchedulerResult<()> {
        if let Some(row) = lock_state(&self.state)?.workers.get_mut(worker_id) {
            row.status = WorkerStatus::Offline;
        }
        Ok(())
    }

    async fn list_worker_rows(&self) -> SchedulerResult<Vec<WorkerRow>> {
        Ok(lock_state(&self.state)?.workers.values().cloned().collect())
    }
}

/// 内存扫描批次：认领先暂存，提交时一次写入
struct MemoryClaimBatch {
    state: Arc<Mutex<MemoryState>>,
    tasks: Vec<DueTask>,
    staged: Vec<(Uuid, String)>,
    finished: bool,
}

impl MemoryClaimBatch {
    fn release(&mut self, state: &mut MemoryState) {
        for task in &self.tasks {
            state.locked.remove(&task.id);
        }
        self.finished = true;
    }
}

#[async_trait]
impl ClaimBatch for MemoryClaimBatch {
    fn tasks(&self) -> &[DueTask] {
        &self.tasks
    }

    async fn mark_claimed(&mut self, task_id: Uuid, worker_id: &str) -> SchedulerResult<()> {
        if !self.tasks.iter().any(|task| task.id == task_id) {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        }
        self.staged.push((task_id, worker_id.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<usize> {
        let mut batch = self;
        let state_handle = Arc::clone(&batch.state);
        let mut state = lock_state(&state_handle)?;
        let now = Utc::now();

        let staged = std::mem::take(&mut batch.staged);
        for (task_id, worker_id) in &staged {
            if let Some(task) = state.task_mut(*task_id) {
                task.picked_at = Some(now);
                task.worker_id = Some(worker_id.clone());
            }
        }
        batch.release(&mut state);
        Ok(staged.len())
    }

    async fn rollback(self: Box<Self>) -> SchedulerResult<()> {
        let mut batch = self;
        let state_handle = Arc::clone(&batch.state);
        let mut state = lock_state(&state_handle)?;
        batch.release(&mut state);
        Ok(())
    }
}

impl Drop for MemoryClaimBatch {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let state_handle = Arc::clone(&self.state);
        let guard = state_handle.lock();
        if let Ok(mut state) = guard {
            self.release(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const LOOKAHEAD: Duration = Duration::from_secs(30);

    async fn seed(store: &InMemoryStore, offsets: &[i64]) -> Vec<Uuid> {
        let now = Utc::now();
        let mut ids = Vec::new();
        for (i, offset) in offsets.iter().enumerate() {
            let task = store
                .insert_task(&format!("task-{i}"), now + ChronoDuration::seconds(*offset))
                .await
                .unwrap();
            ids.push(task.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_claim_respects_lookahead_and_order() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[10, -60, 120]).await;

        let batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        let claimed: Vec<Uuid> = batch.tasks().iter().map(|t| t.id).collect();

        assert_eq!(claimed, vec![ids[1], ids[0]]);
        batch.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_batches_skip_locked_rows() {
        let store = InMemoryStore::new();
        seed(&store, &[-5, -4, -3]).await;

        let first = store.begin_claim(LOOKAHEAD).await.unwrap();
        let second = store.begin_claim(LOOKAHEAD).await.unwrap();

        assert_eq!(first.tasks().len(), 3);
        assert!(second.tasks().is_empty());
        assert_eq!(store.locked_count(), 3);

        drop(first);
        assert_eq!(store.locked_count(), 0);

        let third = store.begin_claim(LOOKAHEAD).await.unwrap();
        assert_eq!(third.tasks().len(), 3);
    }

    #[tokio::test]
    async fn test_commit_applies_only_marked_tasks() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-2, -1]).await;

        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(ids[0], "worker-1").await.unwrap();
        assert_eq!(batch.commit().await.unwrap(), 1);

        let claimed = store.get_task(ids[0]).await.unwrap().unwrap();
        assert!(claimed.picked_at.is_some());
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

        let skipped = store.get_task(ids[1]).await.unwrap().unwrap();
        assert!(skipped.picked_at.is_none());
        assert_eq!(store.locked_count(), 0);

        let batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        assert_eq!(batch.tasks().len(), 1);
        assert_eq!(batch.tasks()[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_rollback_discards_claims() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;

        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(ids[0], "worker-1").await.unwrap();
        batch.rollback().await.unwrap();

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert!(task.picked_at.is_none());
        assert!(task.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_status_timestamps_are_monotonic() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;

        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(ids[0], "worker-1").await.unwrap();
        batch.commit().await.unwrap();

        // 秒级时钟可能早于认领时间
        let early = Utc::now() - ChronoDuration::seconds(5);
        store
            .record_status(ids[0], TaskStatus::Started, early, Some("worker-1"))
            .await
            .unwrap();
        store
            .record_status(ids[0], TaskStatus::Completed, early, Some("worker-1"))
            .await
            .unwrap();

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        let picked = task.picked_at.unwrap();
        let started = task.started_at.unwrap();
        let completed = task.completed_at.unwrap();
        assert!(picked <= started);
        assert!(started <= completed);
    }

    #[tokio::test]
    async fn test_status_waits_for_open_claim() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;

        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(ids[0], "worker-1").await.unwrap();

        let reporter = store.clone();
        let task_id = ids[0];
        let report = tokio::spawn(async move {
            reporter
                .record_status(task_id, TaskStatus::Started, Utc::now(), Some("worker-1"))
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!report.is_finished());
        batch.commit().await.unwrap();

        assert_eq!(report.await.unwrap().unwrap(), StatusUpdateOutcome::Applied);
        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert!(task.picked_at.unwrap() <= task.started_at.unwrap());
    }

    async fn claim(store: &InMemoryStore, id: Uuid, worker_id: &str) {
        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(id, worker_id).await.unwrap();
        batch.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unclaimed_task_rejects_status() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;

        for status in [TaskStatus::Started, TaskStatus::Completed, TaskStatus::Failed] {
            assert!(matches!(
                store.record_status(ids[0], status, Utc::now(), Some("w9")).await,
                Err(SchedulerError::InvalidTransition { .. })
            ));
        }

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert!(task.started_at.is_none() && task.completed_at.is_none());
        assert!(task.worker_id.is_none());

        // 仍可被正常认领
        claim(&store, ids[0], "w1").await;
        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!(task.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_terminal_columns_are_exclusive() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;
        claim(&store, ids[0], "worker-1").await;
        let now = Utc::now();

        store
            .record_status(ids[0], TaskStatus::Failed, now, None)
            .await
            .unwrap();

        assert!(matches!(
            store
                .record_status(ids[0], TaskStatus::Completed, now, None)
                .await,
            Err(SchedulerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.record_status(ids[0], TaskStatus::Started, now, None).await,
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_task_is_untracked() {
        let store = InMemoryStore::new();
        let outcome = store
            .record_status(Uuid::new_v4(), TaskStatus::Completed, Utc::now(), Some("w"))
            .await
            .unwrap();
        assert_eq!(outcome, StatusUpdateOutcome::Untracked);
    }

    #[tokio::test]
    async fn test_status_report_keeps_existing_worker_id() {
        let store = InMemoryStore::new();
        let ids = seed(&store, &[-1]).await;

        let mut batch = store.begin_claim(LOOKAHEAD).await.unwrap();
        batch.mark_claimed(ids[0], "worker-1").await.unwrap();
        batch.commit().await.unwrap();

        store
            .record_status(ids[0], TaskStatus::Started, Utc::now(), Some("worker-2"))
            .await
            .unwrap();

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!(task.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_worker_rows() {
        let store = InMemoryStore::new();
        let row = WorkerRow {
            id: "7".to_string(),
            name: "localhost:9001".to_string(),
            status: WorkerStatus::Online,
            current_task_id: None,
            tasks_completed: 0,
            last_active_at: Utc::now(),
        };
        store.upsert_worker(&row).await.unwrap();
        store.mark_worker_offline("7").await.unwrap();

        let rows = store.list_worker_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, WorkerStatus::Offline);
    }
}
