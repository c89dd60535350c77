use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub bind_address: String,
    /// Worker心跳周期，需与Worker端保持一致
    pub heartbeat_interval_seconds: u64,
    /// 允许连续错过的心跳次数，超过后驱逐
    pub max_heartbeat_misses: u32,
    pub scan_interval_seconds: u64,
    /// 扫描时向未来看多远的任务
    pub scan_lookahead_seconds: u64,
    pub dispatch_timeout_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            heartbeat_interval_seconds: 5,
            max_heartbeat_misses: 3,
            scan_interval_seconds: 10,
            scan_lookahead_seconds: 30,
            dispatch_timeout_seconds: 10,
        }
    }
}

impl CoordinatorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// 巡检周期 = 允许的错过次数 × 心跳周期
    pub fn sweep_interval(&self) -> Duration {
        self.heartbeat_interval() * self.max_heartbeat_misses
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_secs(self.scan_lookahead_seconds)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> SchedulerResult<()> {
        ValidationUtils::validate_socket_address(&self.bind_address, "coordinator.bind_address")?;
        ValidationUtils::validate_interval_seconds(
            self.heartbeat_interval_seconds,
            "coordinator.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_heartbeat_misses as usize,
            "coordinator.max_heartbeat_misses",
            100,
        )?;
        ValidationUtils::validate_interval_seconds(
            self.scan_interval_seconds,
            "coordinator.scan_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.scan_lookahead_seconds,
            "coordinator.scan_lookahead_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.dispatch_timeout_seconds,
            "coordinator.dispatch_timeout_seconds",
        )?;
        Ok(())
    }
}

/// Worker执行任务的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// 固定耗时后视为成功
    Simulated,
    /// 通过 `sh -c` 执行任务数据
    Shell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 未配置时启动时随机生成
    pub worker_id: Option<String>,
    pub bind_address: String,
    /// 对外公布的地址，缺省取 WORKER_ADDRESS 环境变量或 localhost
    pub advertise_address: Option<String>,
    pub coordinator_address: String,
    pub pool_size: usize,
    pub heartbeat_interval_seconds: u64,
    pub execution_mode: ExecutionMode,
    pub task_process_time_ms: u64,
    pub status_report_retries: u32,
    pub status_retry_delay_ms: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            bind_address: "0.0.0.0:0".to_string(),
            advertise_address: None,
            coordinator_address: "coordinator:8080".to_string(),
            pool_size: 5,
            heartbeat_interval_seconds: 5,
            execution_mode: ExecutionMode::Simulated,
            task_process_time_ms: 5000,
            status_report_retries: 3,
            status_retry_delay_ms: 500,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn task_process_time(&self) -> Duration {
        Duration::from_millis(self.task_process_time_ms)
    }

    pub fn status_retry_delay(&self) -> Duration {
        Duration::from_millis(self.status_retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> SchedulerResult<()> {
        if let Some(worker_id) = &self.worker_id {
            ValidationUtils::validate_not_empty(worker_id, "worker.worker_id")?;
        }
        ValidationUtils::validate_socket_address(&self.bind_address, "worker.bind_address")?;
        ValidationUtils::validate_socket_address(
            &self.coordinator_address,
            "worker.coordinator_address",
        )?;
        ValidationUtils::validate_count(self.pool_size, "worker.pool_size", 1000)?;
        ValidationUtils::validate_interval_seconds(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.shutdown_timeout_seconds,
            "worker.shutdown_timeout_seconds",
        )?;

        if self.status_report_retries > 100 {
            return Err(SchedulerError::Configuration(
                "worker.status_report_retries must be less than or equal to 100".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_interval_scales_with_misses() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(15));

        let config = CoordinatorConfig {
            heartbeat_interval_seconds: 2,
            max_heartbeat_misses: 4,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(8));
    }

    #[test]
    fn test_worker_config_validation() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.pool_size = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.coordinator_address = "coordinator".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.worker_id = Some("  ".to_string());
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_coordinator_config_validation() {
        assert!(CoordinatorConfig::default().validate().is_ok());

        let invalid = CoordinatorConfig {
            max_heartbeat_misses: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
