use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use taskmesh_coordinator::{install_prometheus_recorder, CoordinatorService};
use taskmesh_core::config::AppConfig;
use taskmesh_infrastructure::DatabaseManager;
use taskmesh_worker::WorkerService;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行协调器
    Coordinator,
    /// 仅运行Worker
    Worker,
    /// 同一进程内运行协调器和一个Worker
    All,
}

impl AppMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "coordinator" => Ok(AppMode::Coordinator),
            "worker" => Ok(AppMode::Worker),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_coordinator(self) -> bool {
        matches!(self, AppMode::Coordinator | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: Option<DatabaseManager>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    /// 协调器模式下连接数据库并执行迁移
    pub async fn new(mut config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        if mode == AppMode::All {
            config.worker.coordinator_address = local_coordinator_address(&config.coordinator.bind_address);
            info!("Worker将连接本进程内的协调器: {}", config.worker.coordinator_address);
        }

        let (database, metrics_handle) = if mode.runs_coordinator() {
            let database = DatabaseManager::new(&config.database)
                .await
                .context("连接数据库失败")?;
            database.migrate().await.context("执行数据库迁移失败")?;

            let metrics_handle = match install_prometheus_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("指标导出不可用: {}", e);
                    None
                }
            };
            (Some(database), metrics_handle)
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            mode,
            database,
            metrics_handle,
        })
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let result = match self.mode {
            AppMode::Coordinator => self.run_coordinator(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::All => {
                let worker_rx = shutdown_rx.resubscribe();
                tokio::try_join!(self.run_coordinator(shutdown_rx), self.run_worker(worker_rx))
                    .map(|_| ())
            }
        };

        if let Some(database) = &self.database {
            database.close().await;
        }
        result
    }

    async fn run_coordinator(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let database = self
            .database
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("协调器模式需要数据库连接"))?;

        let mut service = CoordinatorService::from_database(self.config.coordinator.clone(), database)
            .context("创建协调器服务失败")?;
        if let Some(handle) = &self.metrics_handle {
            service = service.with_metrics_handle(handle.clone());
        }

        service.run(shutdown_rx).await.context("协调器运行失败")
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let service =
            WorkerService::new(self.config.worker.clone()).context("创建Worker服务失败")?;
        info!("Worker ID: {}", service.worker_id());
        service.run(shutdown_rx).await.context("Worker运行失败")
    }
}

/// 监听在通配地址上的协调器，从本机用回环地址访问
fn local_coordinator_address(bind_address: &str) -> String {
    match bind_address.parse::<SocketAddr>() {
        Ok(addr) if addr.ip().is_unspecified() => format!("127.0.0.1:{}", addr.port()),
        Ok(addr) => addr.to_string(),
        Err(_) => bind_address.to_string(),
    }
}
