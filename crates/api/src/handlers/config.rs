use axum::extract::State;
use serde_json::json;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 对前端公开的配置快照（免认证）
pub async fn public_config(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let config = &state.config;
    Ok(success(json!({
        "app_name": config.app.name,
        "url": config.app.url,
        "country_code": config.app.country_code,
        "phone_digits": config.app.phone_digits,
        "default_avg_job_minutes": config.truck.default_avg_job_minutes,
        "offline_timeout_minutes": config.truck.offline_timeout_minutes,
        "location_update_interval_seconds": config.truck.location_update_interval_seconds,
        "max_distance_km": config.truck.max_distance_km,
        "vapid_public_key": config.notifications.vapid_public_key,
        "notifications_enabled": config.notifications.enabled,
    })))
}
