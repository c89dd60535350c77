pub mod postgres_task_repository;
pub mod postgres_worker_repository;

pub use postgres_task_repository::*;
pub use postgres_worker_repository::*;

use sqlx::migrate::Migrator;

/// 编译期嵌入的迁移脚本
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
