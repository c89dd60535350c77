use std::sync::Arc;
use std::time::Duration;

use taskmesh_core::SchedulerResult;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

use super::CoordinatorApi;

/// 未配置广播地址时读取的环境变量
pub const WORKER_ADDRESS_ENV: &str = "WORKER_ADDRESS";
const DEFAULT_ADVERTISE_HOST: &str = "localhost";

/// 拼出协调器回连用的地址：只有主机名时补上实际监听端口
pub fn advertise_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// 配置优先，其次 `WORKER_ADDRESS` 环境变量，最后是 `localhost`
pub fn resolve_advertise_address(configured: Option<&str>, port: u16) -> String {
    let host = configured
        .map(str::to_string)
        .or_else(|| std::env::var(WORKER_ADDRESS_ENV).ok())
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ADVERTISE_HOST.to_string());
    advertise_address(host.trim(), port)
}

pub struct HeartbeatManager {
    worker_id: String,
    address: String,
    heartbeat_interval: Duration,
    coordinator: Arc<dyn CoordinatorApi>,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: String,
        address: String,
        heartbeat_interval: Duration,
        coordinator: Arc<dyn CoordinatorApi>,
    ) -> Self {
        Self {
            worker_id,
            address,
            heartbeat_interval,
            coordinator,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn send_once(&self) -> SchedulerResult<()> {
        self.coordinator
            .send_heartbeat(&self.worker_id, &self.address)
            .await
    }

    /// 启动后立即发送第一次心跳，之后按固定周期发送；失败只记录日志
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut heartbeat_interval = interval(self.heartbeat_interval);
        info!(
            "Heartbeat started for worker {} at {} every {:?}",
            self.worker_id, self.address, self.heartbeat_interval
        );

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    if let Err(e) = self.send_once().await {
                        warn!("Failed to send heartbeat: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Heartbeat task shutting down");
                    break;
                }
            }
        }
    }
}
