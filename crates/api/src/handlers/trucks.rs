use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use watertruck_core::DispatchError;
use watertruck_dispatcher::{EnrichedUser, TruckUpdate};
use watertruck_domain::GeoPoint;

use crate::{
    error::{ApiError, ApiResult},
    identity::CurrentUser,
    response::{created, success, success_empty},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdateRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// 可接单水车列表（可带客户定位做距离过滤）
pub async fn available_trucks(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let location = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    };
    let trucks = state.trucks.get_available(location).await?;
    Ok(success(trucks))
}

/// 自助注册水车
pub async fn create_truck(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let truck = state.trucks.register(user.user.id).await?;
    Ok(created(truck))
}

/// 水车详情（带排队信息）
pub async fn get_truck(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let truck = state.trucks.get_truck_with_queue(id).await?;
    Ok(success(truck))
}

/// 更新水车资料/激活
pub async fn update_truck(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(update): Json<TruckUpdate>,
) -> ApiResult<impl axum::response::IntoResponse> {
    require_truck_owner(&user, id)?;
    let truck = state.trucks.update_truck(id, update).await?;
    Ok(success(truck))
}

/// 水车工作台：待处理请求 + 名下订单；轮询本接口兼作心跳
pub async fn get_truck_jobs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    require_truck_owner(&user, id)?;
    state.trucks.heartbeat(id).await?;
    let jobs = state.trucks.get_truck_jobs(id).await?;
    Ok(success(jobs))
}

/// 上报GPS位置
pub async fn update_truck_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<LocationUpdateRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    require_truck_owner(&user, id)?;
    state
        .trucks
        .update_location(
            id,
            GeoPoint {
                lat: body.lat,
                lng: body.lng,
            },
        )
        .await?;
    Ok(success_empty())
}

/// 保存推送订阅（按车主用户维度落库，新订阅覆盖旧订阅）
pub async fn save_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<SubscribeRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    require_truck_owner(&user, id)?;
    if body.endpoint.is_empty() || body.keys.p256dh.is_empty() || body.keys.auth.is_empty() {
        return Err(ApiError::BadRequest(
            "订阅必须包含endpoint与p256dh/auth密钥".to_string(),
        ));
    }
    state
        .subscriptions
        .upsert(user.user.id, &body.endpoint, &body.keys.p256dh, &body.keys.auth)
        .await?;
    Ok(success_empty())
}

fn require_truck_owner(user: &EnrichedUser, truck_id: i64) -> Result<(), ApiError> {
    match &user.truck {
        Some(profile) if profile.truck.id == truck_id => Ok(()),
        _ => Err(ApiError::Dispatch(DispatchError::Authorization(format!(
            "水车 {truck_id} 不属于当前用户"
        )))),
    }
}
