//! 协调器服务组装
//!
//! 注册表、分发器与扫描器共享同一个关闭信号；HTTP 服务停止后等待后台循环退出，
//! 再关闭所有Worker连接。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskmesh_core::{
    config::CoordinatorConfig,
    traits::{TaskStore, WorkerConnector, WorkerStore},
    SchedulerError, SchedulerResult,
};
use taskmesh_infrastructure::{DatabaseManager, MetricsCollector};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::dispatcher::TaskDispatcher;
use crate::ledger::WorkerLedger;
use crate::registry::WorkerRegistry;
use crate::scanner::DueTaskScanner;
use crate::server::{create_routes, AppState};
use crate::worker_client::HttpWorkerConnector;

/// 安装全局 Prometheus 记录器，必须在创建 [`MetricsCollector`] 之前调用
pub fn install_prometheus_recorder() -> SchedulerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SchedulerError::Configuration(format!("安装指标记录器失败: {e}")))
}

pub struct CoordinatorService {
    config: CoordinatorConfig,
    dispatcher: Arc<TaskDispatcher>,
    scanner: Arc<DueTaskScanner>,
    metrics_handle: Option<PrometheusHandle>,
}

impl CoordinatorService {
    /// 使用HTTP连接器和数据库管理器提供的存储
    pub fn from_database(
        config: CoordinatorConfig,
        database: &DatabaseManager,
    ) -> SchedulerResult<Self> {
        let connector = Arc::new(HttpWorkerConnector::new(config.dispatch_timeout())?);
        Ok(Self::with_components(
            config,
            connector,
            database.task_store(),
            Some(database.worker_store()),
        ))
    }

    pub fn with_components(
        config: CoordinatorConfig,
        connector: Arc<dyn WorkerConnector>,
        task_store: Arc<dyn TaskStore>,
        worker_store: Option<Arc<dyn WorkerStore>>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(WorkerRegistry::new(
            connector,
            config.max_heartbeat_misses,
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry,
            task_store,
            WorkerLedger::new(worker_store),
            Arc::clone(&metrics),
            config.dispatch_timeout(),
        ));
        let scanner = Arc::new(DueTaskScanner::new(
            Arc::clone(&dispatcher),
            metrics,
            config.lookahead(),
        ));

        Self {
            config,
            dispatcher,
            scanner,
            metrics_handle: None,
        }
    }

    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn scanner(&self) -> &Arc<DueTaskScanner> {
        &self.scanner
    }

    pub fn router(&self) -> Router {
        let mut state = AppState::new(Arc::clone(&self.dispatcher));
        if let Some(handle) = &self.metrics_handle {
            state = state.with_metrics(handle.clone());
        }
        create_routes(state)
    }

    /// 绑定配置中的地址并运行，直到收到关闭信号
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| {
                SchedulerError::Network(format!("绑定 {} 失败: {e}", self.config.bind_address))
            })?;
        self.serve(listener, shutdown_rx).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> SchedulerResult<()> {
        let local_addr: Option<SocketAddr> = listener.local_addr().ok();
        info!("协调器监听 {:?}", local_addr);

        let registry = Arc::clone(self.dispatcher.registry());
        let evict_dispatcher = Arc::clone(&self.dispatcher);
        let sweeper = tokio::spawn(Arc::clone(&registry).run_sweeper(
            self.config.sweep_interval(),
            shutdown_rx.resubscribe(),
            move |evicted| {
                let dispatcher = Arc::clone(&evict_dispatcher);
                tokio::spawn(async move {
                    dispatcher.handle_evicted(&evicted).await;
                });
            },
        ));
        let scanner = tokio::spawn(
            Arc::clone(&self.scanner).run(self.config.scan_interval(), shutdown_rx.resubscribe()),
        );

        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| SchedulerError::Network(format!("协调器HTTP服务异常退出: {e}")));

        for (name, handle) in [("巡检", sweeper), ("扫描", scanner)] {
            if let Err(e) = handle.await {
                warn!("{}任务退出异常: {}", name, e);
            }
        }
        registry.close_all().await;
        info!("协调器已停止");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskmesh_infrastructure::InMemoryStore;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let store = InMemoryStore::new();
        let database = DatabaseManager::with_memory(store);
        let service =
            CoordinatorService::from_database(CoordinatorConfig::default(), &database).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(service.serve(listener, rx));

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
