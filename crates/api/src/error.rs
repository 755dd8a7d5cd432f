use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use watertruck_core::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度错误: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("缺少身份凭据: {0}")]
    Unauthenticated(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Dispatch(e) if e.is_not_found() => {
                (StatusCode::NOT_FOUND, e.to_string(), "NOT_FOUND")
            }
            // 请求本身不合法：修正请求后重发
            ApiError::Dispatch(e) if e.is_validation() => {
                (StatusCode::BAD_REQUEST, e.to_string(), "VALIDATION_ERROR")
            }
            // 乐观并发落败或实体状态不符：可稍后重试
            ApiError::Dispatch(e) if e.is_conflict() => {
                (StatusCode::CONFLICT, e.to_string(), "CONFLICT")
            }
            ApiError::Dispatch(DispatchError::Authorization(msg)) => {
                (StatusCode::FORBIDDEN, format!("无权操作: {msg}"), "FORBIDDEN")
            }
            ApiError::Unauthenticated(msg) => (
                StatusCode::UNAUTHORIZED,
                format!("缺少身份凭据: {msg}"),
                "UNAUTHENTICATED",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::Dispatch(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError::Dispatch(DispatchError::JobNotFound { id: 123 });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let error = ApiError::Dispatch(DispatchError::TruckNotFound { id: 5 });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let error = ApiError::Dispatch(DispatchError::Validation("空列表".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);

        // 状态迁移表外的迁移属于请求不合法，而不是冲突
        let error = ApiError::Dispatch(DispatchError::InvalidTransition {
            from: "accepted".to_string(),
            to: "delivered".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let error = ApiError::Dispatch(DispatchError::Conflict("已被接走".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_authorization_maps_to_403() {
        let error = ApiError::Dispatch(DispatchError::Authorization("不是你的订单".to_string()));
        assert_eq!(error.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unauthenticated_maps_to_401() {
        let error = ApiError::Unauthenticated("缺少设备令牌".to_string());
        assert_eq!(error.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_maps_to_500() {
        let error = ApiError::Internal("boom".to_string());
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let error = ApiError::Dispatch(DispatchError::DatabaseOperation("连接断开".to_string()));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_dispatch_error_conversion() {
        let dispatch_error = DispatchError::JobNotFound { id: 42 };
        let api_error: ApiError = dispatch_error.into();
        match api_error {
            ApiError::Dispatch(DispatchError::JobNotFound { id }) => assert_eq!(id, 42),
            _ => panic!("Expected DispatchError::JobNotFound"),
        }
    }
}
