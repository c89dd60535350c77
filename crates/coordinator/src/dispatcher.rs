//! 任务分发：直接提交、扫描分发与状态上报

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskmesh_core::{
    models::{
        StatusUpdateOutcome, SubmitTaskResponse, UpdateTaskStatusRequest, WorkerSubmitRequest,
    },
    traits::TaskStore,
    SchedulerError, SchedulerResult,
};
use taskmesh_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::debug;
use uuid::Uuid;

use crate::ledger::WorkerLedger;
use crate::registry::{HeartbeatOutcome, WorkerRegistry};

/// 一次成功分发的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAck {
    pub task_id: Uuid,
    pub worker_id: String,
}

pub struct TaskDispatcher {
    registry: Arc<WorkerRegistry>,
    task_store: Arc<dyn TaskStore>,
    ledger: WorkerLedger,
    metrics: Arc<MetricsCollector>,
    dispatch_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        task_store: Arc<dyn TaskStore>,
        ledger: WorkerLedger,
        metrics: Arc<MetricsCollector>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            task_store,
            ledger,
            metrics,
            dispatch_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.task_store
    }

    /// 把任务交给轮询选出的Worker
    ///
    /// Worker确认接收后才记为该Worker的当前任务。
    pub async fn dispatch(&self, task_id: Uuid, data: &str) -> SchedulerResult<DispatchAck> {
        let worker = match self.registry.next_worker().await {
            Ok(worker) => worker,
            Err(e) => {
                self.metrics.record_dispatch_failure();
                StructuredLogger::log_dispatch_failed(task_id, None, &e.to_string());
                return Err(e);
            }
        };

        let request = WorkerSubmitRequest {
            task_id,
            data: data.to_string(),
        };

        let result =
            match tokio::time::timeout(self.dispatch_timeout, worker.endpoint.submit_task(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SchedulerError::Dispatch {
                    worker_id: worker.id.clone(),
                    message: format!("超过 {:?} 未响应", self.dispatch_timeout),
                }),
            };

        if let Err(e) = result {
            self.metrics.record_dispatch_failure();
            StructuredLogger::log_dispatch_failed(task_id, Some(&worker.id), &e.to_string());
            return Err(e);
        }

        if let Some(summary) = self.registry.record_assignment(&worker.id, task_id).await {
            self.ledger.record(&summary).await;
        }

        debug!("任务 {} 分发到Worker {}", task_id, worker.id);
        Ok(DispatchAck {
            task_id,
            worker_id: worker.id,
        })
    }

    /// 直接提交：生成新的任务ID，不写入存储
    pub async fn submit_direct(&self, data: &str) -> SchedulerResult<SubmitTaskResponse> {
        let task_id = Uuid::new_v4();
        let ack = self.dispatch(task_id, data).await?;

        self.metrics.record_direct_submission();
        StructuredLogger::log_task_submitted(task_id, &ack.worker_id);

        Ok(SubmitTaskResponse {
            message: "Task submitted successfully".to_string(),
            task_id,
        })
    }

    /// 处理Worker心跳，新注册的Worker写入 `workers` 表
    pub async fn handle_heartbeat(&self, worker_id: &str, address: &str) -> HeartbeatOutcome {
        let outcome = self.registry.heartbeat(worker_id, address).await;
        if outcome == HeartbeatOutcome::Registered {
            if let Some(summary) = self.registry.get_worker(worker_id).await {
                self.ledger.record(&summary).await;
            }
        }
        outcome
    }

    /// 巡检驱逐后的记账
    pub async fn handle_evicted(&self, worker_ids: &[String]) {
        self.ledger.mark_offline(worker_ids).await;
    }

    /// 处理状态上报
    ///
    /// 缺省时间戳取协调器当前时间；存储中没有的任务（直接提交）只做Worker记账。
    pub async fn report_status(
        &self,
        request: &UpdateTaskStatusRequest,
    ) -> SchedulerResult<StatusUpdateOutcome> {
        let status = request.task_status()?;
        let at = request.timestamp_for(status)?.unwrap_or_else(Utc::now);
        let worker_id = request.worker_id.as_deref().filter(|id| !id.is_empty());

        let outcome = self
            .task_store
            .record_status(request.task_id, status, at, worker_id)
            .await?;

        self.metrics.record_status_report(status);
        StructuredLogger::log_status_report(request.task_id, status, worker_id);

        if let Some(worker_id) = worker_id {
            if let Some(summary) = self.registry.record_status(worker_id, status).await {
                self.ledger.record(&summary).await;
            }
        }

        Ok(outcome)
    }
}
