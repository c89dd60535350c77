use thiserror::Error;
use uuid::Uuid;

use crate::models::TaskStatus;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("没有可用的Worker")]
    NoWorkersAvailable,

    #[error("无效的任务状态码: {0}")]
    InvalidStatus(i32),

    #[error("无效的时间戳: {0}")]
    InvalidTimestamp(String),

    #[error("任务 {task_id} 不允许再次写入 {status} 状态")]
    InvalidTransition { task_id: Uuid, status: TaskStatus },

    #[error("向Worker {worker_id} 分发任务失败: {message}")]
    Dispatch { worker_id: String, message: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("服务正在关闭")]
    ShuttingDown,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 瞬时错误：下一轮扫描或下一次重试可能成功
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::NoWorkersAvailable
                | SchedulerError::Dispatch { .. }
                | SchedulerError::Network(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
