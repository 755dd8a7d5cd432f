//! 设备令牌身份中间件
//!
//! 从 `X-Device-Token` 请求头（或 `device_token` cookie）取出设备
//! 令牌，解析为用户（首次见到的令牌现场建档），塞进请求扩展。
//! 调度核心永远拿到的是已解析的用户，不接触原始令牌。

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::routes::AppState;
use watertruck_dispatcher::EnrichedUser;

const DEVICE_TOKEN_HEADER: &str = "x-device-token";
const DEVICE_TOKEN_COOKIE: &str = "device_token";

/// 当前请求的已解析用户
#[derive(Debug, Clone)]
pub struct CurrentUser(pub EnrichedUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthenticated("请求未经过身份中间件".to_string()))
    }
}

/// 身份解析中间件
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_device_token(&request)
        .ok_or_else(|| ApiError::Unauthenticated("缺少设备令牌".to_string()))?;

    let user = state
        .identity
        .get_or_create_by_device_token(&token)
        .await?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

fn extract_device_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(DEVICE_TOKEN_HEADER) {
        if let Ok(token) = value.to_str() {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    // 退回cookie（浏览器客户端）
    let cookies = request.headers().get("cookie")?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(DEVICE_TOKEN_COOKIE) {
            let value = parts.next().unwrap_or("").trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
