//! 协调器到Worker的HTTP连接

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskmesh_core::{
    models::{ErrorBody, WorkerSubmitRequest, WorkerSubmitResponse},
    traits::{WorkerConnector, WorkerEndpoint},
    SchedulerError, SchedulerResult,
};
use tracing::debug;

/// 为每个注册的Worker创建 [`HttpWorkerClient`]，共享同一个连接池
pub struct HttpWorkerConnector {
    http_client: reqwest::Client,
}

impl HttpWorkerConnector {
    pub fn new(request_timeout: Duration) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }
}

impl WorkerConnector for HttpWorkerConnector {
    fn connect(&self, worker_id: &str, address: &str) -> Arc<dyn WorkerEndpoint> {
        Arc::new(HttpWorkerClient {
            worker_id: worker_id.to_string(),
            base_url: format!("http://{address}"),
            http_client: self.http_client.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct HttpWorkerClient {
    worker_id: String,
    base_url: String,
    http_client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpWorkerClient {
    fn dispatch_error(&self, message: String) -> SchedulerError {
        SchedulerError::Dispatch {
            worker_id: self.worker_id.clone(),
            message,
        }
    }
}

#[async_trait]
impl WorkerEndpoint for HttpWorkerClient {
    async fn submit_task(
        &self,
        request: &WorkerSubmitRequest,
    ) -> SchedulerResult<WorkerSubmitResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.dispatch_error("连接已关闭".to_string()));
        }

        let url = format!("{}/api/v1/tasks", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.dispatch_error(format!("请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => String::new(),
            };
            return Err(self.dispatch_error(format!("HTTP {status} {message}")));
        }

        let ack: WorkerSubmitResponse = response
            .json()
            .await
            .map_err(|e| self.dispatch_error(format!("响应解析失败: {e}")))?;

        if !ack.success {
            return Err(self.dispatch_error(ack.message));
        }

        debug!("任务 {} 已提交到Worker {}", request.task_id, self.worker_id);
        Ok(ack)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
