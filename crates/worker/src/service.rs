//! Worker 服务组装
//!
//! 关闭顺序：停止心跳，拒绝新任务（503），通知执行器，最多等待
//! `shutdown_timeout_seconds` 让手头的任务做完，然后停止HTTP服务。

use std::sync::Arc;

use axum::Router;
use futures::future::join_all;
use taskmesh_core::{
    config::WorkerConfig, models::generate_worker_id, SchedulerError, SchedulerResult,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::components::{
    resolve_advertise_address, CoordinatorApi, CoordinatorClient, HeartbeatManager,
    StatusReporter, TaskExecutionManager,
};
use crate::executors::{create_runner, TaskRunner};
use crate::server::{create_routes, WorkerState};

pub struct WorkerService {
    config: WorkerConfig,
    worker_id: String,
    coordinator: Arc<dyn CoordinatorApi>,
    executor: Arc<TaskExecutionManager>,
}

impl WorkerService {
    /// 通过HTTP连接配置中的协调器，执行器按执行模式创建
    pub fn new(config: WorkerConfig) -> SchedulerResult<Self> {
        let coordinator = Arc::new(CoordinatorClient::new(&config.coordinator_address)?);
        let runner = create_runner(&config);
        Ok(Self::with_components(config, coordinator, runner))
    }

    pub fn with_components(
        config: WorkerConfig,
        coordinator: Arc<dyn CoordinatorApi>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_worker_id);

        let reporter = StatusReporter::new(
            worker_id.clone(),
            Arc::clone(&coordinator),
            config.status_report_retries,
            config.status_retry_delay(),
        );
        let executor = Arc::new(TaskExecutionManager::new(
            worker_id.clone(),
            runner,
            reporter,
            config.pool_size,
        ));

        Self {
            config,
            worker_id,
            coordinator,
            executor,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn executor(&self) -> &Arc<TaskExecutionManager> {
        &self.executor
    }

    pub fn router(&self) -> Router {
        create_routes(WorkerState {
            executor: Arc::clone(&self.executor),
        })
    }

    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| {
                SchedulerError::Network(format!(
                    "Failed to bind {}: {e}",
                    self.config.bind_address
                ))
            })?;
        self.serve(listener, shutdown_rx).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> SchedulerResult<()> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| SchedulerError::Network(format!("Failed to read local address: {e}")))?;
        let address =
            resolve_advertise_address(self.config.advertise_address.as_deref(), local_addr.port());
        info!(
            "Worker {} listening on {}, advertising {}",
            self.worker_id, local_addr, address
        );

        let executors = self.executor.start(&shutdown_rx);
        let heartbeat = Arc::new(HeartbeatManager::new(
            self.worker_id.clone(),
            address,
            self.config.heartbeat_interval(),
            Arc::clone(&self.coordinator),
        ));
        let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown_rx.resubscribe()));

        let draining = Arc::clone(&self.executor);
        let shutdown_timeout = self.config.shutdown_timeout();
        let router = self.router();

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                draining.stop_accepting();
                info!("Waiting up to {:?} for in-flight tasks", shutdown_timeout);
                if tokio::time::timeout(shutdown_timeout, join_all(executors))
                    .await
                    .is_err()
                {
                    warn!("Executors did not finish within {:?}", shutdown_timeout);
                }
            })
            .await
            .map_err(|e| SchedulerError::Network(format!("Worker HTTP server failed: {e}")));

        if let Err(e) = heartbeat_handle.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
        let stats = self.executor.stats();
        info!(
            "Worker {} stopped: received={}, completed={}, failed={}",
            self.worker_id, stats.received, stats.completed, stats.failed
        );
        result
    }
}
