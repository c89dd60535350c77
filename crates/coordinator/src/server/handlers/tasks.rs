use axum::{extract::rejection::JsonRejection, extract::State, Json};
use taskmesh_core::models::{
    StatusUpdateOutcome, SubmitTaskRequest, SubmitTaskResponse, UpdateTaskStatusRequest,
    UpdateTaskStatusResponse,
};
use tracing::debug;

use crate::server::{error::ApiResult, AppState};

/// 直接提交任务
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitTaskResponse>> {
    let Json(request) = payload?;
    let response = state.dispatcher.submit_direct(&request.data).await?;
    Ok(Json(response))
}

/// Worker上报任务状态
pub async fn update_task_status(
    State(state): State<AppState>,
    payload: Result<Json<UpdateTaskStatusRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateTaskStatusResponse>> {
    let Json(request) = payload?;
    let outcome = state.dispatcher.report_status(&request).await?;
    if outcome == StatusUpdateOutcome::Untracked {
        debug!("任务 {} 不在存储中，只更新Worker记账", request.task_id);
    }
    Ok(Json(UpdateTaskStatusResponse { success: true }))
}
