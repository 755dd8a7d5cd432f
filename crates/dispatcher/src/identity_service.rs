use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use watertruck_domain::{
    DispatchError, DispatchResult, Operator, OperatorRepository, Truck, TruckRepository, User,
    UserPatch, UserRepository,
};

/// 用户关联的水车档案（带运营商展示名）
#[derive(Debug, Clone, Serialize)]
pub struct TruckProfile {
    #[serde(flatten)]
    pub truck: Truck,
    pub operator_name: Option<String>,
}

/// 富化后的用户：身份 + 关联的水车/运营商记录
///
/// 角色字段只是提示，这里总是同时探测两种关联记录。
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedUser {
    #[serde(flatten)]
    pub user: User,
    pub truck: Option<TruckProfile>,
    pub operator: Option<Operator>,
}

/// 资料更新入参
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// 身份服务：设备令牌到用户的解析与资料维护
pub struct IdentityService {
    user_repo: Arc<dyn UserRepository>,
    truck_repo: Arc<dyn TruckRepository>,
    operator_repo: Arc<dyn OperatorRepository>,
}

impl IdentityService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        truck_repo: Arc<dyn TruckRepository>,
        operator_repo: Arc<dyn OperatorRepository>,
    ) -> Self {
        Self {
            user_repo,
            truck_repo,
            operator_repo,
        }
    }

    /// 按设备令牌取用户，首次见到的令牌现场建档
    pub async fn get_or_create_by_device_token(
        &self,
        device_token: &str,
    ) -> DispatchResult<EnrichedUser> {
        let user = match self.user_repo.find_by_device_token(device_token).await? {
            Some(user) => user,
            None => {
                let user = self.user_repo.create(device_token).await?;
                info!("新设备首次接入，创建用户 {}", user.id);
                user
            }
        };
        self.enrich(user).await
    }

    pub async fn get_user(&self, user_id: i64) -> DispatchResult<Option<EnrichedUser>> {
        match self.user_repo.find_by_id(user_id).await? {
            Some(user) => Ok(Some(self.enrich(user).await?)),
            None => Ok(None),
        }
    }

    /// 更新资料（邮箱做格式与唯一性校验）
    pub async fn update_profile(
        &self,
        user_id: i64,
        patch: ProfilePatch,
    ) -> DispatchResult<EnrichedUser> {
        let mut update = UserPatch::default();

        if let Some(name) = patch.name {
            update.name = Some(name.trim().to_string());
        }
        if let Some(phone) = patch.phone {
            update.phone = Some(phone.trim().to_string());
        }
        if let Some(email) = patch.email {
            let email = email.trim().to_string();
            if !is_valid_email(&email) {
                return Err(DispatchError::Validation("邮箱格式不正确".to_string()));
            }
            if self.user_repo.email_in_use(&email, user_id).await? {
                return Err(DispatchError::Validation("邮箱已被占用".to_string()));
            }
            update.email = Some(email);
        }

        if !update.is_empty() {
            self.user_repo.update(user_id, &update).await?;
            debug!("更新用户 {} 资料", user_id);
        }

        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(DispatchError::UserNotFound { id: user_id })?;
        self.enrich(user).await
    }

    async fn enrich(&self, user: User) -> DispatchResult<EnrichedUser> {
        let truck = match self.truck_repo.find_by_user_id(user.id).await? {
            Some(truck) => {
                let operator_name = match truck.operator_id {
                    Some(operator_id) => self.operator_display_name(operator_id).await?,
                    None => None,
                };
                Some(TruckProfile {
                    truck,
                    operator_name,
                })
            }
            None => None,
        };

        let operator = self.operator_repo.find_by_user_id(user.id).await?;

        Ok(EnrichedUser {
            user,
            truck,
            operator,
        })
    }

    async fn operator_display_name(&self, operator_id: i64) -> DispatchResult<Option<String>> {
        let Some(operator) = self.operator_repo.find_by_id(operator_id).await? else {
            return Ok(None);
        };
        let owner = self.user_repo.find_by_id(operator.user_id).await?;
        Ok(owner
            .and_then(|u| u.name)
            .or(operator.service_area)
            .or_else(|| Some("Fleet".to_string())))
    }
}

/// 朴素的邮箱格式检查：本地部分@域名，域名里有点
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(' ')
}
