use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::warn;

use watertruck_core::DispatchError;
use watertruck_dispatcher::EnrichedUser;
use watertruck_domain::{GeoPoint, JobStatus, NewJob};

use crate::{
    error::{ApiError, ApiResult},
    identity::CurrentUser,
    response::{created, success, success_empty},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub location: String,
    pub truck_ids: Vec<i64>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct NotifyTrucksRequest {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// 创建订单：向选中的候选水车扇出请求
pub async fn create_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if body.location.trim().is_empty() {
        return Err(ApiError::Dispatch(DispatchError::Validation(
            "送水地址不能为空".to_string(),
        )));
    }
    let details = state
        .dispatch
        .create_job(
            NewJob {
                customer_user_id: user.user.id,
                location: body.location.trim().to_string(),
                customer_name: body.customer_name,
                customer_phone: body.customer_phone,
                lat: body.lat,
                lng: body.lng,
            },
            &body.truck_ids,
        )
        .await?;
    Ok(created(details))
}

/// 当前客户的历史订单
pub async fn list_my_jobs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let jobs = state.dispatch.get_customer_jobs(user.user.id).await?;
    Ok(success(jobs))
}

/// 订单详情
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let details = state.dispatch.get_job_with_details(id).await?;
    Ok(success(details))
}

/// 当前用户的水车接单
pub async fn accept_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let truck_id = require_truck(&user)?;
    let details = state.dispatch.accept_job(id, truck_id).await?;
    Ok(success(details))
}

/// 当前用户的水车拒单
pub async fn reject_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let truck_id = require_truck(&user)?;
    let details = state.dispatch.reject_job(id, truck_id).await?;
    Ok(success(details))
}

/// 接单水车推进订单状态
pub async fn update_job_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateJobStatusRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let truck_id = require_truck(&user)?;
    let status = JobStatus::parse(&body.status).ok_or_else(|| {
        ApiError::Dispatch(DispatchError::Validation(format!(
            "未知的订单状态: {}",
            body.status
        )))
    })?;
    let details = state.dispatch.update_status(id, status, truck_id).await?;
    Ok(success(details))
}

/// 客户取消订单
pub async fn cancel_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let details = state.dispatch.cancel_by_customer(id, user.user.id).await?;
    Ok(success(details))
}

/// 客户到访信号：为附近离线水车累积通知
///
/// 推送链路的任何失败都不影响本接口返回成功。
pub async fn notify_trucks(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Json(body): Json<NotifyTrucksRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let location = match (body.lat, body.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    };
    if let Err(e) = state.fanout.on_customer_visit(location).await {
        warn!("客户到访通知扇出失败: {}", e);
    }
    Ok(success_empty())
}

fn require_truck(user: &EnrichedUser) -> Result<i64, ApiError> {
    user.truck
        .as_ref()
        .map(|profile| profile.truck.id)
        .ok_or_else(|| {
            ApiError::Dispatch(DispatchError::Authorization(
                "当前用户未注册水车".to_string(),
            ))
        })
}
