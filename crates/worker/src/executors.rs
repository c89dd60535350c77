use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use taskmesh_core::{
    config::{ExecutionMode, WorkerConfig},
    SchedulerError, SchedulerResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;
use uuid::Uuid;

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
}

/// 执行任务负载的方式
///
/// 返回 `Err` 或 `success == false` 的结果都按失败上报。
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, task_id: Uuid, data: &str) -> SchedulerResult<TaskOutcome>;
}

/// 模拟执行：固定耗时后成功
pub struct SimulatedRunner {
    process_time: Duration,
}

impl SimulatedRunner {
    pub fn new(process_time: Duration) -> Self {
        Self { process_time }
    }
}

#[async_trait]
impl TaskRunner for SimulatedRunner {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run(&self, task_id: Uuid, data: &str) -> SchedulerResult<TaskOutcome> {
        info!("Simulating task {} ({} bytes) for {:?}", task_id, data.len(), self.process_time);
        tokio::time::sleep(self.process_time).await;
        Ok(TaskOutcome {
            success: true,
            output: None,
            error_message: None,
            exit_code: Some(0),
            execution_time_ms: self.process_time.as_millis() as u64,
        })
    }
}

/// Shell执行：通过 `sh -c` 运行任务负载
#[derive(Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, task_id: Uuid, data: &str) -> SchedulerResult<TaskOutcome> {
        let start_time = Instant::now();
        info!("Running shell task {}: {}", task_id, data);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(data)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SchedulerError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("无法获取stderr".to_string()))?;

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();

        let stdout_task = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stdout_lines.push(line);
            }
        };
        let stderr_task = async {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_lines.push(line);
            }
        };
        tokio::join!(stdout_task, stderr_task);

        let exit_status = child
            .wait()
            .await
            .map_err(|e| SchedulerError::TaskExecution(format!("等待进程结束失败: {e}")))?;

        let success = exit_status.success();
        let exit_code = exit_status.code();
        let error_message = if !stderr_lines.is_empty() {
            Some(stderr_lines.join("\n"))
        } else if !success {
            Some(format!("命令执行失败，退出码: {exit_code:?}"))
        } else {
            None
        };

        let outcome = TaskOutcome {
            success,
            output: (!stdout_lines.is_empty()).then(|| stdout_lines.join("\n")),
            error_message,
            exit_code,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Shell task {} finished: success={}, exit_code={:?}, duration={}ms",
            task_id, outcome.success, outcome.exit_code, outcome.execution_time_ms
        );
        Ok(outcome)
    }
}

/// 按配置的执行模式创建执行器
pub fn create_runner(config: &WorkerConfig) -> Arc<dyn TaskRunner> {
    match config.execution_mode {
        ExecutionMode::Simulated => Arc::new(SimulatedRunner::new(config.task_process_time())),
        ExecutionMode::Shell => Arc::new(ShellRunner::new()),
    }
}
