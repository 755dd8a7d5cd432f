use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use watertruck_domain::{
    DispatchError, DispatchResult, Invite, InviteRepository, OperatorRepository, TruckRepository,
    UserPatch, UserRepository, UserRole,
};

/// 邀请详情（带运营商展示名与可分享链接）
#[derive(Debug, Clone, Serialize)]
pub struct InviteDetails {
    #[serde(flatten)]
    pub invite: Invite,
    pub operator_name: Option<String>,
    pub url: Option<String>,
}

/// 核销结果
#[derive(Debug, Clone, Serialize)]
pub struct RedeemOutcome {
    pub truck_id: i64,
    pub operator_id: i64,
}

/// 邀请服务：一次性令牌把车主拉进运营商车队
pub struct InviteService {
    invite_repo: Arc<dyn InviteRepository>,
    operator_repo: Arc<dyn OperatorRepository>,
    truck_repo: Arc<dyn TruckRepository>,
    user_repo: Arc<dyn UserRepository>,
    /// 拼邀请链接用的站点地址，可为空
    base_url: String,
    default_avg_job_minutes: i32,
}

impl InviteService {
    pub fn new(
        invite_repo: Arc<dyn InviteRepository>,
        operator_repo: Arc<dyn OperatorRepository>,
        truck_repo: Arc<dyn TruckRepository>,
        user_repo: Arc<dyn UserRepository>,
        base_url: String,
        default_avg_job_minutes: i32,
    ) -> Self {
        Self {
            invite_repo,
            operator_repo,
            truck_repo,
            user_repo,
            base_url,
            default_avg_job_minutes,
        }
    }

    /// 生成新的邀请令牌
    pub async fn create_invite(&self, operator_id: i64) -> DispatchResult<InviteDetails> {
        self.operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;

        let token = Uuid::new_v4().to_string();
        let invite = self.invite_repo.create(operator_id, &token).await?;

        info!("运营商 {} 生成邀请 {}", operator_id, invite.id);
        self.with_details(invite).await
    }

    pub async fn get_by_token(&self, token: &str) -> DispatchResult<Option<InviteDetails>> {
        match self.invite_repo.find_by_token(token).await? {
            Some(invite) => Ok(Some(self.with_details(invite).await?)),
            None => Ok(None),
        }
    }

    /// 核销邀请：把用户的水车绑进车队，没有水车就现场建一台
    ///
    /// used标记是一次性的，第二次核销同一令牌必然失败。
    pub async fn redeem(&self, token: &str, user_id: i64) -> DispatchResult<RedeemOutcome> {
        let invite = self
            .invite_repo
            .find_by_token(token)
            .await?
            .ok_or_else(|| DispatchError::InviteNotFound {
                token: token.to_string(),
            })?;

        if invite.used {
            return Err(DispatchError::Conflict("邀请已被使用".to_string()));
        }

        let truck_id = match self.truck_repo.find_by_user_id(user_id).await? {
            Some(truck) => {
                self.truck_repo
                    .set_operator(truck.id, invite.operator_id)
                    .await?;
                truck.id
            }
            None => {
                self.user_repo
                    .update(
                        user_id,
                        &UserPatch {
                            role: Some(UserRole::Truck),
                            ..UserPatch::default()
                        },
                    )
                    .await?;
                self.truck_repo
                    .create(
                        user_id,
                        Some(invite.operator_id),
                        self.default_avg_job_minutes,
                    )
                    .await?
                    .id
            }
        };

        if !self.invite_repo.mark_used(invite.id, truck_id).await? {
            // 并发核销竞争：令牌刚被别人用掉
            return Err(DispatchError::Conflict("邀请已被使用".to_string()));
        }

        info!(
            "邀请 {} 核销成功，水车 {} 加入运营商 {}",
            invite.id, truck_id, invite.operator_id
        );

        Ok(RedeemOutcome {
            truck_id,
            operator_id: invite.operator_id,
        })
    }

    async fn with_details(&self, invite: Invite) -> DispatchResult<InviteDetails> {
        let operator_name = match self.operator_repo.find_by_id(invite.operator_id).await? {
            Some(operator) => self
                .user_repo
                .find_by_id(operator.user_id)
                .await?
                .and_then(|u| u.name),
            None => None,
        };
        let url = if self.base_url.is_empty() {
            None
        } else {
            Some(format!("{}/invite/{}", self.base_url, invite.token))
        };
        Ok(InviteDetails {
            invite,
            operator_name,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{builders::TruckBuilder, builders::UserBuilder, InMemoryStore};
    use watertruck_domain::OperatorMode;

    fn service(store: &InMemoryStore) -> InviteService {
        InviteService::new(
            store.invite_repo(),
            store.operator_repo(),
            store.truck_repo(),
            store.user_repo(),
            "https://water.example".to_string(),
            30,
        )
    }

    #[tokio::test]
    async fn test_create_invite_builds_url() {
        let store = InMemoryStore::new();
        store.insert_user(UserBuilder::new().with_id(7).with_name("Fleet Boss").build());
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);
        let svc = service(&store);

        let invite = svc.create_invite(operator_id).await.unwrap();
        assert!(!invite.invite.used);
        assert_eq!(invite.operator_name.as_deref(), Some("Fleet Boss"));
        let url = invite.url.unwrap();
        assert!(url.starts_with("https://water.example/invite/"));
        assert!(url.ends_with(&invite.invite.token));

        let err = svc.create_invite(999).await.unwrap_err();
        assert!(matches!(err, DispatchError::OperatorNotFound { id: 999 }));
    }

    #[tokio::test]
    async fn test_redeem_creates_truck_for_new_owner() {
        let store = InMemoryStore::new();
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);
        let svc = service(&store);
        let user = store.user_repo().create("device-new").await.unwrap();

        let invite = svc.create_invite(operator_id).await.unwrap();
        let outcome = svc.redeem(&invite.invite.token, user.id).await.unwrap();

        assert_eq!(outcome.operator_id, operator_id);
        let truck = store.get_truck(outcome.truck_id).unwrap();
        assert_eq!(truck.user_id, user.id);
        assert_eq!(truck.operator_id, Some(operator_id));
        assert!(store.get_invite(invite.invite.id).unwrap().used);
    }

    #[tokio::test]
    async fn test_redeem_binds_existing_truck() {
        let store = InMemoryStore::new();
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);
        let svc = service(&store);
        let user = store.user_repo().create("device-owner").await.unwrap();
        store.insert_truck(
            TruckBuilder::new()
                .with_id(5)
                .with_user_id(user.id)
                .with_name("existing")
                .build(),
        );

        let invite = svc.create_invite(operator_id).await.unwrap();
        let outcome = svc.redeem(&invite.invite.token, user.id).await.unwrap();

        assert_eq!(outcome.truck_id, 5);
        assert_eq!(store.get_truck(5).unwrap().operator_id, Some(operator_id));
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let store = InMemoryStore::new();
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);
        let svc = service(&store);
        let first = store.user_repo().create("device-1").await.unwrap();
        let second = store.user_repo().create("device-2").await.unwrap();

        let invite = svc.create_invite(operator_id).await.unwrap();
        svc.redeem(&invite.invite.token, first.id).await.unwrap();

        let err = svc
            .redeem(&invite.invite.token, second.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        let err = svc.redeem("no-such-token", second.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::InviteNotFound { .. }));
    }
}
