use std::sync::Arc;

use taskmesh_core::{
    config::{DatabaseConfig, MEMORY_DATABASE_URL},
    traits::{TaskStore, WorkerStore},
    SchedulerError, SchedulerResult,
};
use tracing::{info, warn};

use super::memory::InMemoryStore;
use super::postgres::{PostgresTaskStore, PostgresWorkerStore, MIGRATOR};

/// 按URL识别存储类型
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    Memory,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with(MEMORY_DATABASE_URL) {
            DatabaseType::Memory
        } else {
            DatabaseType::PostgreSQL
        }
    }
}

pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    Memory(InMemoryStore),
}

impl DatabasePool {
    /// 建立连接池，启动阶段数据库可能还没就绪，按配置重试
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        if DatabaseType::from_url(&config.url) == DatabaseType::Memory {
            info!("使用内存存储");
            return Ok(DatabasePool::Memory(InMemoryStore::new()));
        }

        let attempts = config.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(config.connection_timeout())
                .idle_timeout(config.idle_timeout())
                .connect(&config.url)
                .await;

            match result {
                Ok(pool) => {
                    info!("数据库连接成功 (第 {} 次尝试)", attempt);
                    return Ok(DatabasePool::PostgreSQL(pool));
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "数据库连接失败 (第 {}/{} 次尝试): {}，{} 秒后重试",
                        attempt, attempts, e, config.connect_retry_delay_seconds
                    );
                    tokio::time::sleep(config.connect_retry_delay()).await;
                }
                Err(e) => return Err(SchedulerError::Database(e)),
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::Memory(_) => DatabaseType::Memory,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        if let DatabasePool::PostgreSQL(pool) = self {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map_err(SchedulerError::Database)?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        if let DatabasePool::PostgreSQL(pool) = self {
            pool.close().await;
        }
    }
}

/// 统一的存储管理器
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = DatabasePool::connect(config).await?;
        Ok(Self { pool })
    }

    /// 直接包装一个内存存储，测试中共享同一份数据时使用
    pub fn with_memory(store: InMemoryStore) -> Self {
        Self {
            pool: DatabasePool::Memory(store),
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// 运行嵌入的迁移脚本，内存存储无需迁移
    pub async fn migrate(&self) -> SchedulerResult<()> {
        if let DatabasePool::PostgreSQL(pool) = &self.pool {
            MIGRATOR
                .run(pool)
                .await
                .map_err(|e| SchedulerError::DatabaseOperation(format!("数据库迁移失败: {e}")))?;
            info!("数据库迁移完成");
        }
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresTaskStore::new(pool.clone())),
            DatabasePool::Memory(store) => Arc::new(store.clone()),
        }
    }

    pub fn worker_store(&self) -> Arc<dyn WorkerStore> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresWorkerStore::new(pool.clone())),
            DatabasePool::Memory(store) => Arc::new(store.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_database_type_detection() {
        assert_eq!(
            DatabaseType::from_url("postgresql://localhost/taskmesh"),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            DatabaseType::from_url("postgres://user@db:5432/tasks"),
            DatabaseType::PostgreSQL
        );
        assert_eq!(DatabaseType::from_url("memory://"), DatabaseType::Memory);
    }

    #[tokio::test]
    async fn test_memory_manager_shares_store() {
        let config = DatabaseConfig {
            url: MEMORY_DATABASE_URL.to_string(),
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        assert_eq!(manager.database_type(), DatabaseType::Memory);
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let writer = manager.task_store();
        let reader = manager.task_store();
        let task = writer.insert_task("echo hi", Utc::now()).await.unwrap();

        assert_eq!(reader.get_task(task.id).await.unwrap(), Some(task));
    }
}
