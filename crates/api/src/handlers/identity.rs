use axum::{extract::State, Json};

use watertruck_dispatcher::ProfilePatch;

use crate::{error::ApiResult, identity::CurrentUser, response::success, routes::AppState};

/// 当前用户（含关联的水车/运营商档案）
pub async fn get_me(
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(user))
}

/// 更新当前用户资料
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let updated = state.identity.update_profile(user.user.id, patch).await?;
    Ok(success(updated))
}
