use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    coordinator_worker::{CoordinatorConfig, WorkerConfig},
    database::DatabaseConfig,
    logging::LoggingConfig,
    validation::ConfigValidator,
};
use crate::SchedulerResult;

/// 未指定配置文件时依次尝试的路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/taskmesh.toml",
    "taskmesh.toml",
    "/etc/taskmesh/config.toml",
];

/// 环境变量前缀，例如 `TASKMESH_DATABASE__URL`
pub const ENV_PREFIX: &str = "TASKMESH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> SchedulerResult<()> {
        self.database.validate()?;
        self.coordinator.validate()?;
        self.worker.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.coordinator.bind_address, "0.0.0.0:8080");
        assert_eq!(config.coordinator.max_heartbeat_misses, 3);
        assert_eq!(config.worker.pool_size, 5);
        assert_eq!(config.worker.coordinator_address, "coordinator:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[database]
url = "memory://"

[coordinator]
scan_interval_seconds = 2

[worker]
pool_size = 2
execution_mode = "shell"
"#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert!(config.database.is_memory());
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.coordinator.scan_interval_seconds, 2);
        assert_eq!(config.coordinator.scan_lookahead_seconds, 30);
        assert_eq!(config.worker.pool_size, 2);
        assert_eq!(config.worker.execution_mode, ExecutionMode::Shell);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_app_config_rejects_invalid_values() {
        let toml_str = r#"
[logging]
format = "xml"
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_app_config_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.worker.worker_id = Some("worker-a".to_string());

        let serialized = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&serialized).unwrap();

        assert_eq!(parsed.worker.worker_id.as_deref(), Some("worker-a"));
        assert_eq!(parsed.coordinator.bind_address, config.coordinator.bind_address);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[coordinator]\nbind_address = \"127.0.0.1:9090\"\n\n[worker]\nheartbeat_interval_seconds = 7"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.coordinator.bind_address, "127.0.0.1:9090");
        assert_eq!(config.worker.heartbeat_interval_seconds, 7);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/taskmesh.toml")).is_err());
    }
}
