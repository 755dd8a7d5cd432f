//! 出站推送能力的抽象端口
//!
//! 调度核心只依赖该接口；VAPID签名和载荷加密等传输细节由
//! 基础设施层的实现负责。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::PushSubscription;

/// 推送载荷
///
/// `data.type` 是客户端区分通知种类的约定字段：
/// `water_collected`（发给客户，携带job_id）、
/// `customers_nearby`（发给水车，携带customer_count）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: serde_json::Value,
}

impl PushPayload {
    /// 发给离线水车的"附近有客户"聚合通知
    pub fn customers_nearby(customer_count: i32) -> Self {
        let body = if customer_count == 1 {
            "1 customer is looking for water in your area".to_string()
        } else {
            format!("{customer_count} customers are looking for water in your area")
        };
        Self {
            title: "Customers Looking for Water!".to_string(),
            body,
            icon: "/images/logo.png".to_string(),
            badge: "/images/logo.png".to_string(),
            data: serde_json::json!({
                "url": "/truck",
                "type": "customers_nearby",
                "customer_count": customer_count,
            }),
        }
    }

    /// 水车取水出发时发给客户的通知
    pub fn water_collected(job_id: i64, truck_name: &str) -> Self {
        Self {
            title: "Water is on the way!".to_string(),
            body: format!("{truck_name} has collected your water and is heading your way"),
            icon: "/images/logo.png".to_string(),
            badge: "/images/logo.png".to_string(),
            data: serde_json::json!({
                "url": "/customer",
                "type": "water_collected",
                "job_id": job_id,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    /// 订阅已失效（端点返回404/410）
    #[error("推送订阅已过期")]
    ExpiredSubscription,

    #[error("推送发送失败: {0}")]
    Transport(String),
}

impl PushError {
    pub fn is_expired_subscription(&self) -> bool {
        matches!(self, PushError::ExpiredSubscription)
    }
}

/// 推送发送端口
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}
