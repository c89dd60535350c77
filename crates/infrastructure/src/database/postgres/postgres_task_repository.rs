use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use taskmesh_core::{
    models::{DueTask, StatusUpdateOutcome, TaskRecord, TaskStatus},
    traits::{ClaimBatch, TaskStore},
    SchedulerError, SchedulerResult,
};
use tracing::debug;
use uuid::Uuid;

const TASK_COLUMNS: &str =
    "id, command, scheduled_at, picked_at, started_at, completed_at, failed_at, worker_id";

/// PostgreSQL任务仓储实现
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<TaskRecord> {
        Ok(TaskRecord {
            id: row.try_get("id")?,
            command: row.try_get("command")?,
            scheduled_at: row.try_get("scheduled_at")?,
            picked_at: row.try_get("picked_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            worker_id: row.try_get("worker_id")?,
        })
    }

    /// 构造条件更新语句
    ///
    /// 只接受已被认领的任务；每列只写一次，两个终态列互斥；写入的时间戳不早于上一个生命周期时间戳。
    fn status_update_sql(status: TaskStatus) -> String {
        let (floor, guard) = match status {
            TaskStatus::Started => (
                "picked_at",
                "started_at IS NULL AND completed_at IS NULL AND failed_at IS NULL",
            ),
            TaskStatus::Completed | TaskStatus::Failed => (
                "COALESCE(started_at, picked_at)",
                "completed_at IS NULL AND failed_at IS NULL",
            ),
        };
        format!(
            "UPDATE tasks SET {column} = GREATEST($1, {floor}), worker_id = COALESCE(worker_id, $3) \
             WHERE id = $2 AND picked_at IS NOT NULL AND {guard}",
            column = status.column(),
        )
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert_task(
        &self,
        command: &str,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<TaskRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO tasks (command, scheduled_at) VALUES ($1, $2) RETURNING {TASK_COLUMNS}"
        ))
        .bind(command)
        .bind(scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let task = Self::row_to_task(&row)?;
        debug!("创建任务成功: {} (scheduled_at={})", task.id, task.scheduled_at);
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> SchedulerResult<Option<TaskRecord>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_tasks(&self) -> SchedulerResult<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY scheduled_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn begin_claim(&self, lookahead: Duration) -> SchedulerResult<Box<dyn ClaimBatch>> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;

        let rows = sqlx::query(
            r#"
            SELECT id, command, scheduled_at
            FROM tasks
            WHERE scheduled_at < NOW() + ($1::float8 * INTERVAL '1 second')
              AND picked_at IS NULL
            ORDER BY scheduled_at
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(lookahead.as_secs_f64())
        .fetch_all(&mut *tx)
        .await
        .map_err(SchedulerError::Database)?;

        let tasks = rows
            .iter()
            .map(|row| -> SchedulerResult<DueTask> {
                Ok(DueTask {
                    id: row.try_get("id")?,
                    command: row.try_get("command")?,
                    scheduled_at: row.try_get("scheduled_at")?,
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        debug!("锁定待认领任务 {} 个", tasks.len());
        Ok(Box::new(PostgresClaimBatch {
            tx,
            tasks,
            claimed: 0,
        }))
    }

    async fn record_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> SchedulerResult<StatusUpdateOutcome> {
        let result = sqlx::query(&Self::status_update_sql(status))
            .bind(at)
            .bind(task_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() > 0 {
            debug!("任务 {} 写入状态 {}", task_id, status);
            return Ok(StatusUpdateOutcome::Applied);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = $1)")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if exists {
            Err(SchedulerError::InvalidTransition { task_id, status })
        } else {
            Ok(StatusUpdateOutcome::Untracked)
        }
    }
}

/// 一次扫描事务，持有被锁定的行直到提交或回滚
pub struct PostgresClaimBatch {
    tx: Transaction<'static, Postgres>,
    tasks: Vec<DueTask>,
    claimed: usize,
}

#[async_trait]
impl ClaimBatch for PostgresClaimBatch {
    fn tasks(&self) -> &[DueTask] {
        &self.tasks
    }

    async fn mark_claimed(&mut self, task_id: Uuid, worker_id: &str) -> SchedulerResult<()> {
        sqlx::query("UPDATE tasks SET picked_at = NOW(), worker_id = $2 WHERE id = $1")
            .bind(task_id)
            .bind(worker_id)
            .execute(&mut *self.tx)
            .await
            .map_err(SchedulerError::Database)?;

        self.claimed += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<usize> {
        let batch = *self;
        batch.tx.commit().await.map_err(SchedulerError::Database)?;
        Ok(batch.claimed)
    }

    async fn rollback(self: Box<Self>) -> SchedulerResult<()> {
        let batch = *self;
        batch.tx.rollback().await.map_err(SchedulerError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_sql_guards() {
        let started = PostgresTaskStore::status_update_sql(TaskStatus::Started);
        assert!(started.contains("SET started_at = GREATEST($1, picked_at)"));
        assert!(started.contains("started_at IS NULL AND completed_at IS NULL"));

        let failed = PostgresTaskStore::status_update_sql(TaskStatus::Failed);
        assert!(failed.contains("SET failed_at = GREATEST($1, COALESCE(started_at, picked_at))"));
        assert!(failed.contains("completed_at IS NULL AND failed_at IS NULL"));
        assert!(!failed.contains("started_at IS NULL"));

        for sql in [started, failed] {
            assert!(sql.contains("picked_at IS NOT NULL"));
        }
    }
}
