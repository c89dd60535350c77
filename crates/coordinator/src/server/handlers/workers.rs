use axum::{extract::rejection::JsonRejection, extract::State, Json};
use taskmesh_core::models::{HeartbeatRequest, HeartbeatResponse, ListWorkersResponse};

use crate::server::{error::ApiResult, AppState};

/// Worker心跳，未知的Worker自动注册
pub async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let Json(request) = payload?;
    state
        .dispatcher
        .handle_heartbeat(&request.worker_id, &request.address)
        .await;
    Ok(Json(HeartbeatResponse { acknowledged: true }))
}

pub async fn list_workers(State(state): State<AppState>) -> Json<ListWorkersResponse> {
    let workers = state.dispatcher.registry().list_workers().await;
    Json(ListWorkersResponse { workers })
}
