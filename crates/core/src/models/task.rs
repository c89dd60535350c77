use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;

/// 任务记录，对应 `tasks` 表的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub command: String,
    pub scheduled_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl TaskRecord {
    pub fn new(command: impl Into<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            scheduled_at,
            picked_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            worker_id: None,
        }
    }

    /// 由已设置的时间戳推导出任务所处的生命周期阶段
    pub fn state(&self) -> TaskState {
        if self.completed_at.is_some() {
            TaskState::Completed
        } else if self.failed_at.is_some() {
            TaskState::Failed
        } else if self.started_at.is_some() {
            TaskState::Running
        } else if self.picked_at.is_some() {
            TaskState::Claimed
        } else {
            TaskState::Unclaimed
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some() || self.failed_at.is_some()
    }

    /// 是否处于可被扫描认领的状态
    pub fn is_due(&self, cutoff: DateTime<Utc>) -> bool {
        self.picked_at.is_none() && self.scheduled_at < cutoff
    }
}

/// 任务生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Unclaimed,
    Claimed,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Unclaimed => "unclaimed",
            TaskState::Claimed => "claimed",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Worker上报的任务状态，线上编码为 1/2/3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Started,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn code(self) -> i32 {
        match self {
            TaskStatus::Started => 1,
            TaskStatus::Completed => 2,
            TaskStatus::Failed => 3,
        }
    }

    /// 该状态写入的 `tasks` 列名
    pub fn column(self) -> &'static str {
        match self {
            TaskStatus::Started => "started_at",
            TaskStatus::Completed => "completed_at",
            TaskStatus::Failed => "failed_at",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl TryFrom<i32> for TaskStatus {
    type Error = SchedulerError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(TaskStatus::Started),
            2 => Ok(TaskStatus::Completed),
            3 => Ok(TaskStatus::Failed),
            other => Err(SchedulerError::InvalidStatus(other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Started => "STARTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// 扫描事务中被锁定的待认领任务
#[derive(Debug, Clone, PartialEq)]
pub struct DueTask {
    pub id: Uuid,
    pub command: String,
    pub scheduled_at: DateTime<Utc>,
}

/// 状态写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdateOutcome {
    /// 时间戳已写入存储
    Applied,
    /// 存储中没有这个任务（直接提交的任务不经过存储）
    Untracked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_follows_timestamps() {
        let now = Utc::now();
        let mut task = TaskRecord::new("generate-monthly-report", now - Duration::seconds(60));
        assert_eq!(task.state(), TaskState::Unclaimed);

        task.picked_at = Some(now);
        task.worker_id = Some("42".to_string());
        assert_eq!(task.state(), TaskState::Claimed);

        task.started_at = Some(now);
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.is_terminal());

        task.failed_at = Some(now);
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_is_due_respects_cutoff_and_claim() {
        let now = Utc::now();
        let mut task = TaskRecord::new("cleanup", now + Duration::seconds(10));

        assert!(task.is_due(now + Duration::seconds(30)));
        assert!(!task.is_due(now));

        task.picked_at = Some(now);
        assert!(!task.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn test_status_codes() {
        for status in [TaskStatus::Started, TaskStatus::Completed, TaskStatus::Failed] {
            assert_eq!(TaskStatus::try_from(status.code()).unwrap(), status);
        }

        assert!(matches!(
            TaskStatus::try_from(0),
            Err(SchedulerError::InvalidStatus(0))
        ));
        assert!(matches!(
            TaskStatus::try_from(4),
            Err(SchedulerError::InvalidStatus(4))
        ));
    }

    #[test]
    fn test_status_columns() {
        assert_eq!(TaskStatus::Started.column(), "started_at");
        assert_eq!(TaskStatus::Completed.column(), "completed_at");
        assert_eq!(TaskStatus::Failed.column(), "failed_at");
        assert!(!TaskStatus::Started.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
