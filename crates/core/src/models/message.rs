//! 协调器与Worker之间的RPC消息体
//!
//! 传输层为 HTTP + JSON，这里只定义请求和响应的结构，路由在各自的服务端实现。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TaskStatus, WorkerSummary};
use crate::errors::{SchedulerError, SchedulerResult};

/// 直接提交任务（不经过存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub message: String,
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

/// 任务状态上报
///
/// `status` 为 1/2/3，时间戳为秒级 Unix 时间的字符串。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskStatusRequest {
    pub task_id: Uuid,
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl UpdateTaskStatusRequest {
    pub fn new(
        task_id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
        worker_id: Option<String>,
    ) -> Self {
        let epoch = Some(at.timestamp().to_string());
        let mut request = Self {
            task_id,
            status: status.code(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            worker_id,
        };
        match status {
            TaskStatus::Started => request.started_at = epoch,
            TaskStatus::Completed => request.completed_at = epoch,
            TaskStatus::Failed => request.failed_at = epoch,
        }
        request
    }

    pub fn task_status(&self) -> SchedulerResult<TaskStatus> {
        TaskStatus::try_from(self.status)
    }

    /// 取出与状态对应的时间戳，缺省时返回 `None`
    pub fn timestamp_for(&self, status: TaskStatus) -> SchedulerResult<Option<DateTime<Utc>>> {
        let raw = match status {
            TaskStatus::Started => self.started_at.as_deref(),
            TaskStatus::Completed => self.completed_at.as_deref(),
            TaskStatus::Failed => self.failed_at.as_deref(),
        };
        raw.map(parse_epoch_seconds).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskStatusResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListWorkersResponse {
    pub workers: Vec<WorkerSummary>,
}

/// 协调器发往Worker的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSubmitRequest {
    pub task_id: Uuid,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSubmitResponse {
    pub message: String,
    pub success: bool,
    pub task_id: Uuid,
}

/// 统一的错误响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

pub fn parse_epoch_seconds(raw: &str) -> SchedulerResult<DateTime<Utc>> {
    let seconds: i64 = raw
        .trim()
        .parse()
        .map_err(|_| SchedulerError::InvalidTimestamp(raw.to_string()))?;
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| SchedulerError::InvalidTimestamp(raw.to_string()))
}
