//! 到期任务扫描
//!
//! 每个周期开启一次扫描事务，锁定窗口内未认领的任务并逐个分发。
//! 分发失败的任务保持未认领，留给下一轮；多个协调器并发扫描时互相跳过对方锁定的行。

use std::sync::Arc;
use std::time::{Duration, Instant};

use taskmesh_core::{traits::ClaimBatch, SchedulerResult};
use taskmesh_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::dispatcher::TaskDispatcher;

/// 一次扫描的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub selected: usize,
    pub claimed: usize,
    pub skipped: usize,
}

pub struct DueTaskScanner {
    dispatcher: Arc<TaskDispatcher>,
    metrics: Arc<MetricsCollector>,
    lookahead: Duration,
}

impl DueTaskScanner {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        metrics: Arc<MetricsCollector>,
        lookahead: Duration,
    ) -> Self {
        Self {
            dispatcher,
            metrics,
            lookahead,
        }
    }

    /// 执行一轮扫描
    ///
    /// 分发错误只跳过该任务；其他错误回滚整个批次，所有任务保持未认领。
    pub async fn scan_once(&self) -> SchedulerResult<ScanReport> {
        let started = Instant::now();
        let mut batch = self
            .dispatcher
            .task_store()
            .begin_claim(self.lookahead)
            .await?;

        let report = match self.claim_all(batch.as_mut()).await {
            Ok(report) => report,
            Err(e) => {
                if let Err(rollback_error) = batch.rollback().await {
                    error!("扫描事务回滚失败: {}", rollback_error);
                }
                return Err(e);
            }
        };

        let claimed = batch.commit().await?;
        let report = ScanReport { claimed, ..report };

        self.metrics.record_scan(
            report.claimed,
            report.skipped,
            started.elapsed().as_secs_f64(),
        );
        StructuredLogger::log_scan_completed(report.selected, report.claimed, report.skipped);
        Ok(report)
    }

    async fn claim_all(&self, batch: &mut dyn ClaimBatch) -> SchedulerResult<ScanReport> {
        let tasks = batch.tasks().to_vec();
        let mut report = ScanReport {
            selected: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            let ack = match self.dispatcher.dispatch(task.id, &task.command).await {
                Ok(ack) => ack,
                Err(e) if e.is_transient() => {
                    warn!("任务 {} 分发失败，留待下一轮: {}", task.id, e);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            batch.mark_claimed(task.id, &ack.worker_id).await?;
            StructuredLogger::log_task_claimed(task.id, &ack.worker_id, task.scheduled_at);
            report.claimed += 1;
        }

        Ok(report)
    }

    /// 按固定周期扫描，直到收到关闭信号
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        info!("到期任务扫描已启动，周期 {:?}，窗口 {:?}", interval, self.lookahead);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(report) if report.selected > 0 => {
                            info!(
                                "扫描完成: 选中 {} 个，认领 {} 个，跳过 {} 个",
                                report.selected, report.claimed, report.skipped
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("扫描到期任务失败: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("到期任务扫描收到关闭信号");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::WorkerLedger;
    use crate::registry::WorkerRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use taskmesh_core::models::{WorkerSubmitRequest, WorkerSubmitResponse};
    use taskmesh_core::traits::{TaskStore, WorkerConnector, WorkerEndpoint};
    use taskmesh_core::SchedulerError;
    use taskmesh_infrastructure::InMemoryStore;

    /// 拒绝指定命令的假Worker
    struct FakeEndpoint {
        reject_command: Option<&'static str>,
        received: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WorkerEndpoint for FakeEndpoint {
        async fn submit_task(
            &self,
            request: &WorkerSubmitRequest,
        ) -> SchedulerResult<WorkerSubmitResponse> {
            if self.reject_command == Some(request.data.as_str()) {
                return Err(SchedulerError::Dispatch {
                    worker_id: "fake".to_string(),
                    message: "rejected".to_string(),
                });
            }
            self.received.lock().unwrap().push(request.data.clone());
            Ok(WorkerSubmitResponse {
                message: "Task received".to_string(),
                success: true,
                task_id: request.task_id,
            })
        }
    }

    struct FakeConnector {
        reject_command: Option<&'static str>,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl WorkerConnector for FakeConnector {
        fn connect(&self, _worker_id: &str, _address: &str) -> Arc<dyn WorkerEndpoint> {
            Arc::new(FakeEndpoint {
                reject_command: self.reject_command,
                received: Arc::clone(&self.received),
            })
        }
    }

    struct Fixture {
        scanner: DueTaskScanner,
        dispatcher: Arc<TaskDispatcher>,
        store: InMemoryStore,
        received: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(reject_command: Option<&'static str>) -> Fixture {
        let store = InMemoryStore::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(FakeConnector {
                reject_command,
                received: Arc::clone(&received),
            }),
            3,
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry,
            Arc::new(store.clone()),
            WorkerLedger::disabled(),
            Arc::clone(&metrics),
            Duration::from_secs(1),
        ));
        let scanner = DueTaskScanner::new(
            Arc::clone(&dispatcher),
            metrics,
            Duration::from_secs(30),
        );
        Fixture {
            scanner,
            dispatcher,
            store,
            received,
        }
    }

    #[tokio::test]
    async fn test_scan_claims_due_tasks_in_order() {
        let f = fixture(None);
        f.dispatcher.handle_heartbeat("1", "localhost:9001").await;

        let now = Utc::now();
        let second = f
            .store
            .insert_task("second", now + chrono::Duration::seconds(5))
            .await
            .unwrap();
        let first = f
            .store
            .insert_task("first", now - chrono::Duration::seconds(5))
            .await
            .unwrap();
        let later = f
            .store
            .insert_task("later", now + chrono::Duration::seconds(600))
            .await
            .unwrap();

        let report = f.scanner.scan_once().await.unwrap();
        assert_eq!(
            report,
            ScanReport {
                selected: 2,
                claimed: 2,
                skipped: 0
            }
        );
        assert_eq!(*f.received.lock().unwrap(), vec!["first", "second"]);

        for id in [first.id, second.id] {
            let task = f.store.get_task(id).await.unwrap().unwrap();
            assert!(task.picked_at.is_some());
            assert_eq!(task.worker_id.as_deref(), Some("1"));
        }
        let task = f.store.get_task(later.id).await.unwrap().unwrap();
        assert!(task.picked_at.is_none());

        // 已认领的任务不会被再次选中
        let report = f.scanner.scan_once().await.unwrap();
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn test_scan_without_workers_leaves_tasks_unclaimed() {
        let f = fixture(None);
        let task = f.store.insert_task("echo", Utc::now()).await.unwrap();

        let report = f.scanner.scan_once().await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.claimed, 0);
        assert_eq!(report.skipped, 1);

        let stored = f.store.get_task(task.id).await.unwrap().unwrap();
        assert!(stored.picked_at.is_none());
        assert_eq!(f.store.locked_count(), 0);

        f.dispatcher.handle_heartbeat("1", "localhost:9001").await;
        let report = f.scanner.scan_once().await.unwrap();
        assert_eq!(report.claimed, 1);
    }

    #[tokio::test]
    async fn test_rejected_task_is_skipped_others_claimed() {
        let f = fixture(Some("poison"));
        f.dispatcher.handle_heartbeat("1", "localhost:9001").await;

        let now = Utc::now();
        let poison = f
            .store
            .insert_task("poison", now - chrono::Duration::seconds(2))
            .await
            .unwrap();
        let good = f
            .store
            .insert_task("good", now - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let report = f.scanner.scan_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.skipped, 1);

        assert!(f.store.get_task(poison.id).await.unwrap().unwrap().picked_at.is_none());
        assert!(f.store.get_task(good.id).await.unwrap().unwrap().picked_at.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(None);
        let scanner = Arc::new(f.scanner);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(Arc::clone(&scanner).run(Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
