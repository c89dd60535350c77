//! 协调器的HTTP RPC服务

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::dispatcher::TaskDispatcher;
use handlers::{
    health::{health_check, render_metrics},
    tasks::{submit_task, update_task_status},
    workers::{heartbeat, list_workers},
};

pub use error::{ApiError, ApiResult};

/// 协调器路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<TaskDispatcher>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(dispatcher: Arc<TaskDispatcher>) -> Self {
        Self {
            dispatcher,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api/v1/tasks", post(submit_task))
        .route("/api/v1/tasks/status", post(update_task_status))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/heartbeat", post(heartbeat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
