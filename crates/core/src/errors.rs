use thiserror::Error;

/// 调度系统错误类型定义
///
/// 四类对调用方可见的错误必须能够区分：
/// 参数验证（Validation）、资源不存在（*NotFound）、
/// 状态冲突（Conflict/InvalidTransition）、权限不足（Authorization）。
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("订单未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("订单请求未找到: 订单 {job_id}, 水车 {truck_id}")]
    JobRequestNotFound { job_id: i64, truck_id: i64 },

    #[error("水车未找到: {id}")]
    TruckNotFound { id: i64 },

    #[error("运营商未找到: {id}")]
    OperatorNotFound { id: i64 },

    #[error("用户未找到: {id}")]
    UserNotFound { id: i64 },

    #[error("邀请码无效: {token}")]
    InviteNotFound { token: String },

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("非法状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("无权操作: {0}")]
    Authorization(String),

    #[error("推送通知错误: {0}")]
    Notification(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    /// 判断是否为调用方可重试的冲突类错误
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Conflict(_))
    }

    /// 判断是否为请求本身不合法（调用方需修正请求而非重试）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DispatchError::Validation(_) | DispatchError::InvalidTransition { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatchError::JobNotFound { .. }
                | DispatchError::JobRequestNotFound { .. }
                | DispatchError::TruckNotFound { .. }
                | DispatchError::OperatorNotFound { .. }
                | DispatchError::UserNotFound { .. }
                | DispatchError::InviteNotFound { .. }
        )
    }
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
