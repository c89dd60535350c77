use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use taskmesh_core::{
    models::{WorkerRow, WorkerStatus},
    traits::WorkerStore,
    SchedulerError, SchedulerResult,
};
use tracing::debug;

/// PostgreSQL Worker仓储实现
pub struct PostgresWorkerStore {
    pool: PgPool,
}

impl PostgresWorkerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &PgRow) -> SchedulerResult<WorkerRow> {
        let status: String = row.try_get("status")?;
        Ok(WorkerRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: WorkerStatus::parse(&status),
            current_task_id: row.try_get("current_task_id")?,
            tasks_completed: row.try_get("tasks_completed")?,
            last_active_at: row.try_get("last_active_at")?,
        })
    }
}

#[async_trait]
impl WorkerStore for PostgresWorkerStore {
    async fn upsert_worker(&self, worker: &WorkerRow) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, status, current_task_id, tasks_completed, last_active_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                current_task_id = EXCLUDED.current_task_id,
                tasks_completed = EXCLUDED.tasks_completed,
                last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.name)
        .bind(worker.status.as_str())
        .bind(worker.current_task_id)
        .bind(worker.tasks_completed)
        .bind(worker.last_active_at)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("更新Worker记录: {}", worker.id);
        Ok(())
    }

    async fn mark_worker_offline(&self, worker_id: &str) -> SchedulerResult<()> {
        sqlx::query("UPDATE workers SET status = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(WorkerStatus::Offline.as_str())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        debug!("Worker记录标记为离线: {}", worker_id);
        Ok(())
    }

    async fn list_worker_rows(&self) -> SchedulerResult<Vec<WorkerRow>> {
        let rows = sqlx::query(
            "SELECT id, name, status, current_task_id, tasks_completed, last_active_at FROM workers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }
}
