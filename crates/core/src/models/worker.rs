use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Worker在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "online" => WorkerStatus::Online,
            _ => WorkerStatus::Offline,
        }
    }
}

/// 协调器注册表快照中的一项，`ListWorkers` 的返回元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    pub address: String,
    pub status: WorkerStatus,
    pub last_active_at: DateTime<Utc>,
    pub current_task_id: Option<Uuid>,
    pub tasks_completed: u64,
    pub heartbeat_misses: u32,
}

/// 生成随机的Worker ID（u32 的十进制表示）
pub fn generate_worker_id() -> String {
    rand::random::<u32>().to_string()
}

/// `workers` 表的一行
///
/// 与协调器内存注册表相比只是一份宽松的记账，协调器重启后两者可能不一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRow {
    pub id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub current_task_id: Option<Uuid>,
    pub tasks_completed: i64,
    pub last_active_at: DateTime<Utc>,
}

impl From<&WorkerSummary> for WorkerRow {
    fn from(summary: &WorkerSummary) -> Self {
        Self {
            id: summary.id.clone(),
            name: summary.address.clone(),
            status: summary.status,
            current_task_id: summary.current_task_id,
            tasks_completed: summary.tasks_completed as i64,
            last_active_at: summary.last_active_at,
        }
    }
}
