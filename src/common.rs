use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskmesh_core::{config::AppConfig, init_logging_from_config};
use tokio::signal;
use tracing::{error, info, warn};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 进程退出前等待应用关闭的上限
const APP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// 命令行给出的启动参数，未给出的项沿用配置文件
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub worker_id: Option<String>,
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(ref level) = startup_config.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = startup_config.log_format {
        config.logging.format = format.clone();
    }
    if let Some(ref worker_id) = startup_config.worker_id {
        config.worker.worker_id = Some(worker_id.clone());
    }

    Ok(config)
}

/// 启动应用程序的通用函数
pub async fn start_application(
    startup_config: StartupConfig,
    app_mode: AppMode,
    service_name: &str,
) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging_from_config(&config.logging).context("初始化日志系统失败")?;

    info!("启动 {} 服务", service_name);
    info!("运行模式: {:?}", app_mode);

    let app = Arc::new(Application::new(config, app_mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };
    let abort_handle = app_handle.abort_handle();

    // 应用自行退出（如端口被占用）时不再等待信号
    let mut app_handle = app_handle;
    let finished = tokio::select! {
        _ = wait_for_shutdown_signal() => None,
        result = &mut app_handle => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            match tokio::time::timeout(APP_SHUTDOWN_TIMEOUT, app_handle).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} 服务关闭超时，强制退出", service_name);
                    abort_handle.abort();
                    return Ok(());
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => info!("{} 服务已优雅关闭", service_name),
        Ok(Err(e)) => {
            error!("{} 服务运行失败: {:#}", service_name, e);
            return Err(e);
        }
        Err(e) => {
            error!("{} 服务任务异常: {}", service_name, e);
            return Err(e.into());
        }
    }

    info!("{} 服务已退出", service_name);
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_apply_on_top_of_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[logging]\nlevel = \"warn\"\n\n[worker]\nworker_id = \"from-file\"\npool_size = 2"
        )
        .unwrap();

        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().to_string()),
            log_level: Some("debug".to_string()),
            worker_id: Some("from-cli".to_string()),
            ..Default::default()
        };
        let config = load_config(&startup).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.worker.worker_id.as_deref(), Some("from-cli"));
        assert_eq!(config.worker.pool_size, 2);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/taskmesh.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }
}
