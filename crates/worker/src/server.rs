//! Worker 的HTTP RPC服务

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use taskmesh_core::{
    models::{ErrorBody, ErrorDetail, WorkerSubmitRequest, WorkerSubmitResponse},
    SchedulerError,
};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::components::TaskExecutionManager;

#[derive(Clone)]
pub struct WorkerState {
    pub executor: Arc<TaskExecutionManager>,
}

pub fn create_routes(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks", post(submit_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Worker HTTP 接口的错误
#[derive(Debug, thiserror::Error)]
pub enum WorkerApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for WorkerApiError {
    fn from(rejection: JsonRejection) -> Self {
        WorkerApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for WorkerApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            WorkerApiError::Scheduler(SchedulerError::ShuttingDown) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "Worker is shutting down".to_string(),
            ),
            WorkerApiError::Scheduler(e) => {
                error!("Worker request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal worker error".to_string(),
                )
            }
            WorkerApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

async fn submit_task(
    State(state): State<WorkerState>,
    payload: Result<Json<WorkerSubmitRequest>, JsonRejection>,
) -> Result<Json<WorkerSubmitResponse>, WorkerApiError> {
    let Json(request) = payload?;
    let task_id = request.task_id;
    state.executor.submit(request).await?;

    Ok(Json(WorkerSubmitResponse {
        message: "Task received".to_string(),
        success: true,
        task_id,
    }))
}

async fn health_check(State(state): State<WorkerState>) -> Json<Value> {
    let stats = state.executor.stats();
    Json(json!({
        "status": if state.executor.is_accepting() { "ok" } else { "draining" },
        "worker_id": state.executor.worker_id(),
        "tasks_received": stats.received,
        "tasks_completed": stats.completed,
        "tasks_failed": stats.failed,
    }))
}
