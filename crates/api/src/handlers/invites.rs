use axum::extract::{Path, State};

use watertruck_core::DispatchError;

use crate::{
    error::{ApiError, ApiResult},
    identity::CurrentUser,
    response::{created, success},
    routes::AppState,
};

/// 生成邀请令牌（运营商）
pub async fn create_invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operator_id = user.operator.as_ref().map(|op| op.id).ok_or_else(|| {
        ApiError::Dispatch(DispatchError::Authorization(
            "当前用户不是运营商".to_string(),
        ))
    })?;
    let invite = state.invites.create_invite(operator_id).await?;
    Ok(created(invite))
}

/// 邀请详情（核销前预览）
pub async fn get_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let invite = state
        .invites
        .get_by_token(&token)
        .await?
        .ok_or(DispatchError::InviteNotFound { token })?;
    Ok(success(invite))
}

/// 核销邀请：当前用户的水车加入运营商车队
pub async fn redeem_invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(token): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let outcome = state.invites.redeem(&token, user.user.id).await?;
    Ok(success(outcome))
}
