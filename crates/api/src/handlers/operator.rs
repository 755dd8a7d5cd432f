use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use watertruck_core::DispatchError;
use watertruck_dispatcher::EnrichedUser;
use watertruck_domain::OperatorMode;

use crate::{
    error::{ApiError, ApiResult},
    identity::CurrentUser,
    response::{created, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateOperatorRequest {
    pub service_area: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignJobRequest {
    pub truck_id: i64,
}

/// 开通运营商档案
pub async fn create_operator(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateOperatorRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator = state
        .operators
        .create_operator(user.user.id, body.service_area.as_deref())
        .await?;
    Ok(created(operator))
}

/// 当前用户的运营商档案
pub async fn get_operator(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator = state
        .operators
        .get_by_user(user.user.id)
        .await?
        .ok_or_else(|| {
            ApiError::Dispatch(DispatchError::Authorization(
                "当前用户不是运营商".to_string(),
            ))
        })?;
    Ok(success(operator))
}

/// 切换 delegated / dispatcher 模式
pub async fn set_operator_mode(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<SetModeRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator_id = require_operator(&user)?;
    let mode = OperatorMode::parse(&body.mode).ok_or_else(|| {
        ApiError::Dispatch(DispatchError::Validation(format!(
            "未知的运营模式: {}（可选: delegated / dispatcher）",
            body.mode
        )))
    })?;
    let operator = state.operators.set_mode(operator_id, mode).await?;
    Ok(success(operator))
}

/// 车队列表（带排队与ETA标注）
pub async fn get_operator_trucks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator_id = require_operator(&user)?;
    let fleet = state.operators.get_trucks(operator_id).await?;
    Ok(success(fleet))
}

/// 运营商订单工作台
pub async fn get_operator_jobs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator_id = require_operator(&user)?;
    let dashboard = state.operators.get_jobs(operator_id).await?;
    Ok(success(dashboard))
}

/// dispatcher模式手动指派订单
pub async fn assign_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<AssignJobRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator_id = require_operator(&user)?;
    let details = state
        .dispatch
        .assign_job(id, body.truck_id, operator_id)
        .await?;
    Ok(success(details))
}

fn require_operator(user: &EnrichedUser) -> Result<i64, ApiError> {
    user.operator.as_ref().map(|op| op.id).ok_or_else(|| {
        ApiError::Dispatch(DispatchError::Authorization(
            "当前用户不是运营商".to_string(),
        ))
    })
}
