use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use taskmesh_core::{
    models::{
        ErrorBody, HeartbeatRequest, ListWorkersResponse, SubmitTaskRequest, SubmitTaskResponse,
        UpdateTaskStatusRequest, WorkerSummary,
    },
    SchedulerError, SchedulerResult,
};
use tracing::{debug, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INVALID_TRANSITION_CODE: &str = "INVALID_TRANSITION";

/// Worker 对协调器的调用面
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn send_heartbeat(&self, worker_id: &str, address: &str) -> SchedulerResult<()>;

    async fn update_task_status(&self, request: &UpdateTaskStatusRequest) -> SchedulerResult<()>;
}

/// 协调器的HTTP客户端
pub struct CoordinatorClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl CoordinatorClient {
    /// `coordinator_address` 可以是 `host:port`，也可以带 `http://` 前缀
    pub fn new(coordinator_address: &str) -> SchedulerResult<Self> {
        Self::with_timeout(coordinator_address, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(coordinator_address: &str, timeout: Duration) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(coordinator_address),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 直接提交任务
    pub async fn submit_task(&self, data: &str) -> SchedulerResult<SubmitTaskResponse> {
        let url = format!("{}/api/v1/tasks", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&SubmitTaskRequest {
                data: data.to_string(),
            })
            .send()
            .await
            .map_err(connection_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SchedulerError::Serialization(format!("Invalid submit response: {e}")))
    }

    pub async fn list_workers(&self) -> SchedulerResult<Vec<WorkerSummary>> {
        let url = format!("{}/api/v1/workers", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(connection_error)?;

        let response = check_status(response).await?;
        let body: ListWorkersResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::Serialization(format!("Invalid workers response: {e}")))?;
        Ok(body.workers)
    }

    /// 协调器不可达时返回空列表
    pub async fn list_workers_or_empty(&self) -> Vec<WorkerSummary> {
        match self.list_workers().await {
            Ok(workers) => workers,
            Err(e) => {
                warn!("Failed to list workers from {}: {}", self.base_url, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CoordinatorApi for CoordinatorClient {
    async fn send_heartbeat(&self, worker_id: &str, address: &str) -> SchedulerResult<()> {
        let url = format!("{}/api/v1/workers/heartbeat", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&HeartbeatRequest {
                worker_id: worker_id.to_string(),
                address: address.to_string(),
            })
            .send()
            .await
            .map_err(connection_error)?;

        check_status(response).await?;
        debug!("Heartbeat sent successfully for worker {}", worker_id);
        Ok(())
    }

    async fn update_task_status(&self, request: &UpdateTaskStatusRequest) -> SchedulerResult<()> {
        let url = format!("{}/api/v1/tasks/status", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(connection_error)?;

        if !response.status().is_success() {
            let (status, code, message) = read_error(response).await;
            if status == StatusCode::CONFLICT && code == INVALID_TRANSITION_CODE {
                return Err(SchedulerError::InvalidTransition {
                    task_id: request.task_id,
                    status: request.task_status()?,
                });
            }
            return Err(classify_error(status, &code, &message));
        }
        debug!(
            "Status {} reported for task {}",
            request.status, request.task_id
        );
        Ok(())
    }
}

fn normalize_base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn connection_error(e: reqwest::Error) -> SchedulerError {
    SchedulerError::Network(format!("Coordinator connection error: {e}"))
}

/// 把非 2xx 响应转换成错误
async fn check_status(response: reqwest::Response) -> SchedulerResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let (status, code, message) = read_error(response).await;
    Err(classify_error(status, &code, &message))
}

async fn read_error(response: reqwest::Response) -> (StatusCode, String, String) {
    let status = response.status();
    let (code, message) = response
        .json::<ErrorBody>()
        .await
        .map(|b| (b.error.code, b.error.message))
        .unwrap_or_default();
    (status, code, message)
}

/// 服务端错误可重试；请求被拒绝（4xx）不可重试
fn classify_error(status: StatusCode, code: &str, message: &str) -> SchedulerError {
    if code == "NO_WORKERS_AVAILABLE" {
        return SchedulerError::NoWorkersAvailable;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return SchedulerError::Network(format!("HTTP {status} {code}: {message}"));
    }
    SchedulerError::Internal(format!(
        "Coordinator rejected request: HTTP {status} {code}: {message}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(
            normalize_base_url("coordinator:8080"),
            "http://coordinator:8080"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            normalize_base_url("https://mesh.example.com"),
            "https://mesh.example.com"
        );
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_is_transient() {
        let client =
            CoordinatorClient::with_timeout("127.0.0.1:1", Duration::from_millis(500)).unwrap();

        let err = client.send_heartbeat("1", "localhost:9000").await.unwrap_err();
        assert!(err.is_transient());

        assert!(client.list_workers_or_empty().await.is_empty());
    }

    #[test]
    fn test_error_classification() {
        assert!(classify_error(StatusCode::BAD_GATEWAY, "DISPATCH_FAILED", "").is_transient());
        assert!(matches!(
            classify_error(StatusCode::SERVICE_UNAVAILABLE, "NO_WORKERS_AVAILABLE", ""),
            SchedulerError::NoWorkersAvailable
        ));
        assert!(!classify_error(StatusCode::BAD_REQUEST, "INVALID_STATUS", "").is_transient());
    }
}
