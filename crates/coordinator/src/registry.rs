//! Worker注册表
//!
//! 以心跳驱动的成员表：首次心跳注册，之后的心跳清零错过计数，
//! 周期巡检累加计数并驱逐超过阈值的Worker。注册顺序决定轮询顺序。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskmesh_core::{
    models::{TaskStatus, WorkerStatus, WorkerSummary},
    traits::{WorkerConnector, WorkerEndpoint},
    SchedulerError, SchedulerResult,
};
use taskmesh_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// 协调器默认允许连续错过的心跳次数
pub const DEFAULT_MAX_MISSES: u32 = 3;

/// 注册表中的一个Worker
pub struct WorkerEntry {
    pub id: String,
    pub address: String,
    pub endpoint: Arc<dyn WorkerEndpoint>,
    pub heartbeat_misses: u32,
    pub last_active_at: DateTime<Utc>,
    pub current_task_id: Option<Uuid>,
    pub tasks_completed: u64,
}

impl WorkerEntry {
    fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            id: self.id.clone(),
            address: self.address.clone(),
            status: WorkerStatus::Online,
            last_active_at: self.last_active_at,
            current_task_id: self.current_task_id,
            tasks_completed: self.tasks_completed,
            heartbeat_misses: self.heartbeat_misses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Registered,
    Refreshed,
}

/// 被选中的Worker
#[derive(Clone)]
pub struct SelectedWorker {
    pub id: String,
    pub endpoint: Arc<dyn WorkerEndpoint>,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, WorkerEntry>,
    order: Vec<String>,
}

pub struct WorkerRegistry {
    state: RwLock<RegistryState>,
    connector: Arc<dyn WorkerConnector>,
    max_misses: u32,
    cursor: AtomicUsize,
    metrics: Arc<MetricsCollector>,
}

impl WorkerRegistry {
    pub fn new(
        connector: Arc<dyn WorkerConnector>,
        max_misses: u32,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            connector,
            max_misses,
            cursor: AtomicUsize::new(0),
            metrics,
        }
    }

    /// 处理一次心跳
    ///
    /// 已知Worker只清零错过计数，不会因为地址变化重新建立连接。
    pub async fn heartbeat(&self, worker_id: &str, address: &str) -> HeartbeatOutcome {
        let mut state = self.state.write().await;

        if let Some(entry) = state.workers.get_mut(worker_id) {
            entry.heartbeat_misses = 0;
            entry.last_active_at = Utc::now();
            debug!("收到Worker心跳: {}", worker_id);
            return HeartbeatOutcome::Refreshed;
        }

        let endpoint = self.connector.connect(worker_id, address);
        state.workers.insert(
            worker_id.to_string(),
            WorkerEntry {
                id: worker_id.to_string(),
                address: address.to_string(),
                endpoint,
                heartbeat_misses: 0,
                last_active_at: Utc::now(),
                current_task_id: None,
                tasks_completed: 0,
            },
        );
        state.order.push(worker_id.to_string());

        StructuredLogger::log_worker_registered(worker_id, address);
        self.metrics.record_worker_registered(state.order.len());
        HeartbeatOutcome::Registered
    }

    /// 一次巡检：错过计数超过阈值的Worker被驱逐并关闭连接，其余计数加一
    pub async fn sweep(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let max_misses = self.max_misses;

        let mut evicted = Vec::new();
        for entry in state.workers.values_mut() {
            if entry.heartbeat_misses > max_misses {
                evicted.push(entry.id.clone());
            } else {
                entry.heartbeat_misses += 1;
            }
        }

        for worker_id in &evicted {
            if let Some(entry) = state.workers.remove(worker_id) {
                StructuredLogger::log_worker_evicted(
                    &entry.id,
                    &entry.address,
                    entry.heartbeat_misses,
                );
                entry.endpoint.close();
            }
        }

        if !evicted.is_empty() {
            state.order.retain(|id| !evicted.contains(id));
            self.metrics
                .record_workers_evicted(evicted.len(), state.order.len());
        }

        evicted
    }

    /// 轮询选择下一个Worker
    ///
    /// 游标每次调用都前进，与选择结果是否被使用无关。
    pub async fn next_worker(&self) -> SchedulerResult<SelectedWorker> {
        let state = self.state.read().await;
        if state.order.is_empty() {
            return Err(SchedulerError::NoWorkersAvailable);
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % state.order.len();
        let worker_id = &state.order[index];
        let entry = state
            .workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::Internal(format!("注册表顺序与内容不一致: {worker_id}")))?;

        debug!(
            "轮询选择Worker: {} (索引: {}/{})",
            worker_id,
            index,
            state.order.len()
        );

        Ok(SelectedWorker {
            id: entry.id.clone(),
            endpoint: Arc::clone(&entry.endpoint),
        })
    }

    /// 记录Worker接受了一个任务
    pub async fn record_assignment(&self, worker_id: &str, task_id: Uuid) -> Option<WorkerSummary> {
        let mut state = self.state.write().await;
        let entry = state.workers.get_mut(worker_id)?;
        entry.current_task_id = Some(task_id);
        Some(entry.summary())
    }

    /// 状态上报的记账，只记在上报的Worker名下
    pub async fn record_status(&self, worker_id: &str, status: TaskStatus) -> Option<WorkerSummary> {
        let mut state = self.state.write().await;
        let entry = state.workers.get_mut(worker_id)?;

        if status == TaskStatus::Completed {
            entry.tasks_completed += 1;
        }
        if status.is_terminal() {
            entry.current_task_id = None;
        }
        entry.last_active_at = Utc::now();
        Some(entry.summary())
    }

    /// 按注册顺序列出全部Worker
    pub async fn list_workers(&self) -> Vec<WorkerSummary> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.workers.get(id))
            .map(WorkerEntry::summary)
            .collect()
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerSummary> {
        self.state
            .read()
            .await
            .workers
            .get(worker_id)
            .map(WorkerEntry::summary)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 关闭全部连接并清空注册表
    pub async fn close_all(&self) {
        let mut state = self.state.write().await;
        for entry in state.workers.values() {
            entry.endpoint.close();
        }
        state.workers.clear();
        state.order.clear();
    }

    /// 按固定周期巡检，直到收到关闭信号
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
        on_evicted: impl Fn(Vec<String>) + Send + 'static,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        info!("Worker巡检已启动，周期 {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep().await;
                    if !evicted.is_empty() {
                        on_evicted(evicted);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker巡检收到关闭信号");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use taskmesh_core::models::{WorkerSubmitRequest, WorkerSubmitResponse};

    #[derive(Default)]
    struct RecordingEndpoint {
        closed: AtomicBool,
    }

    #[async_trait]
    impl WorkerEndpoint for RecordingEndpoint {
        async fn submit_task(
            &self,
            request: &WorkerSubmitRequest,
        ) -> SchedulerResult<WorkerSubmitResponse> {
            Ok(WorkerSubmitResponse {
                message: "ok".to_string(),
                success: true,
                task_id: request.task_id,
            })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        endpoints: Mutex<Vec<(String, Arc<RecordingEndpoint>)>>,
    }

    impl RecordingConnector {
        fn endpoint(&self, worker_id: &str) -> Arc<RecordingEndpoint> {
            self.endpoints
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == worker_id)
                .map(|(_, endpoint)| Arc::clone(endpoint))
                .unwrap()
        }

        fn connections(&self) -> usize {
            self.endpoints.lock().unwrap().len()
        }
    }

    impl WorkerConnector for RecordingConnector {
        fn connect(&self, worker_id: &str, _address: &str) -> Arc<dyn WorkerEndpoint> {
            let endpoint = Arc::new(RecordingEndpoint::default());
            self.endpoints
                .lock()
                .unwrap()
                .push((worker_id.to_string(), Arc::clone(&endpoint)));
            endpoint
        }
    }

    fn registry(connector: Arc<RecordingConnector>) -> WorkerRegistry {
        WorkerRegistry::new(
            connector,
            DEFAULT_MAX_MISSES,
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn test_first_heartbeat_registers_once() {
        let connector = Arc::new(RecordingConnector::default());
        let registry = registry(Arc::clone(&connector));

        assert_eq!(
            registry.heartbeat("1", "10.0.0.1:9000").await,
            HeartbeatOutcome::Registered
        );
        assert_eq!(
            registry.heartbeat("1", "10.0.0.1:9000").await,
            HeartbeatOutcome::Refreshed
        );

        assert_eq!(registry.len().await, 1);
        assert_eq!(connector.connections(), 1);
    }

    #[tokio::test]
    async fn test_eviction_after_missed_heartbeats() {
        let connector = Arc::new(RecordingConnector::default());
        let registry = registry(Arc::clone(&connector));
        registry.heartbeat("1", "10.0.0.1:9000").await;

        // 计数 0 -> 1 -> 2 -> 3 -> 4，第五次巡检时 4 > 3 被驱逐
        for _ in 0..=DEFAULT_MAX_MISSES {
            assert!(registry.sweep().await.is_empty());
        }
        assert_eq!(registry.len().await, 1);

        assert_eq!(registry.sweep().await, vec!["1".to_string()]);
        assert!(registry.is_empty().await);
        assert!(connector.endpoint("1").closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_heartbeat_resets_misses() {
        let connector = Arc::new(RecordingConnector::default());
        let registry = registry(connector);
        registry.heartbeat("1", "10.0.0.1:9000").await;

        for _ in 0..10 {
            registry.sweep().await;
            registry.sweep().await;
            registry.heartbeat("1", "10.0.0.1:9000").await;
        }

        let worker = registry.get_worker("1").await.unwrap();
        assert_eq!(worker.heartbeat_misses, 0);
    }

    #[tokio::test]
    async fn test_round_robin_follows_registration_order() {
        let connector = Arc::new(RecordingConnector::default());
        let registry = registry(connector);
        for id in ["a", "b", "c"] {
            registry.heartbeat(id, "localhost:1").await;
        }

        let mut picked = Vec::new();
        for _ in 0..6 {
            picked.push(registry.next_worker().await.unwrap().id);
        }
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_round_robin_is_balanced() {
        let connector = Arc::new(RecordingConnector::default());
        let registry = registry(connector);
        for id in ["1", "2", "3", "4"] {
            registry.heartbeat(id, "localhost:1").await;
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..8 {
            let worker = registry.next_worker().await.unwrap();
            *counts.entry(worker.id).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|count| *count == 2));
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_worker() {
        let registry = registry(Arc::new(RecordingConnector::default()));
        assert!(matches!(
            registry.next_worker().await,
            Err(SchedulerError::NoWorkersAvailable)
        ));
    }

    #[tokio::test]
    async fn test_status_bookkeeping() {
        let registry = registry(Arc::new(RecordingConnector::default()));
        registry.heartbeat("1", "localhost:1").await;

        let task_id = Uuid::new_v4();
        registry.record_assignment("1", task_id).await.unwrap();
        assert_eq!(
            registry.get_worker("1").await.unwrap().current_task_id,
            Some(task_id)
        );

        registry.record_status("1", TaskStatus::Started).await.unwrap();
        assert_eq!(
            registry.get_worker("1").await.unwrap().current_task_id,
            Some(task_id)
        );

        let summary = registry
            .record_status("1", TaskStatus::Completed)
            .await
            .unwrap();
        assert_eq!(summary.tasks_completed, 1);
        assert_eq!(summary.current_task_id, None);

        let summary = registry.record_status("1", TaskStatus::Failed).await.unwrap();
        assert_eq!(summary.tasks_completed, 1);

        assert!(registry.record_status("ghost", TaskStatus::Completed).await.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let registry = Arc::new(registry(Arc::new(RecordingConnector::default())));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(Arc::clone(&registry).run_sweeper(
            Duration::from_millis(10),
            rx,
            |_| {},
        ));
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
