use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use taskmesh_core::{
    models::{ErrorBody, ErrorDetail},
    SchedulerError,
};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(SchedulerError::NoWorkersAvailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_WORKERS_AVAILABLE")
            }
            ApiError::Scheduler(SchedulerError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
            }
            ApiError::Scheduler(SchedulerError::Dispatch { .. }) => {
                (StatusCode::BAD_GATEWAY, "DISPATCH_FAILED")
            }
            ApiError::Scheduler(SchedulerError::InvalidStatus(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_STATUS")
            }
            ApiError::Scheduler(SchedulerError::InvalidTimestamp(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_TIMESTAMP")
            }
            ApiError::Scheduler(SchedulerError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            ApiError::Scheduler(SchedulerError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 内部错误不向调用方暴露细节
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            match &self {
                ApiError::Scheduler(e) => e.to_string(),
                ApiError::BadRequest(msg) => msg.clone(),
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

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_core::models::TaskStatus;
    use uuid::Uuid;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SchedulerError::NoWorkersAvailable, StatusCode::SERVICE_UNAVAILABLE),
            (
                SchedulerError::Dispatch {
                    worker_id: "1".to_string(),
                    message: "refused".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (SchedulerError::InvalidStatus(7), StatusCode::BAD_REQUEST),
            (
                SchedulerError::InvalidTimestamp("abc".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                SchedulerError::InvalidTransition {
                    task_id: Uuid::new_v4(),
                    status: TaskStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (
                SchedulerError::DatabaseOperation("down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bad_request_code() {
        let error = ApiError::BadRequest("missing field".to_string());
        assert_eq!(error.status_and_code(), (StatusCode::BAD_REQUEST, "BAD_REQUEST"));
    }
}
