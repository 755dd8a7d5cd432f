//! Web Push 中继网关客户端
//!
//! VAPID签名与载荷加密由网关侧完成，这里只负责把订阅凭据和
//! 通知内容转发过去，并把HTTP结果翻译成端口语义。

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use watertruck_domain::{PushError, PushNotifier, PushPayload, PushSubscription};

#[derive(Debug, Clone)]
pub struct WebPushConfig {
    pub gateway_url: String,
    pub vapid_subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
}

pub struct WebPushGateway {
    client: reqwest::Client,
    config: WebPushConfig,
}

impl WebPushGateway {
    pub fn new(config: WebPushConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl PushNotifier for WebPushGateway {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let body = json!({
            "subscription": {
                "endpoint": subscription.endpoint,
                "keys": {
                    "p256dh": subscription.p256dh,
                    "auth": subscription.auth,
                },
            },
            "notification": payload,
            "vapid": {
                "subject": self.config.vapid_subject,
                "public_key": self.config.vapid_public_key,
                "private_key": self.config.vapid_private_key,
            },
        });

        let response = self
            .client
            .post(&self.config.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                debug!("推送发送成功: 用户 {}", subscription.user_id);
                Ok(())
            }
            // 端点已失效：订阅过期
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::ExpiredSubscription),
            status => Err(PushError::Transport(format!("推送网关返回 {status}"))),
        }
    }
}
