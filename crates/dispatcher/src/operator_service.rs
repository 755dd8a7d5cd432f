use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use watertruck_domain::{
    DispatchError, DispatchResult, JobRepository, Operator, OperatorActiveJob, OperatorMode,
    OperatorPendingJob, OperatorRepository, Truck, TruckRepository, UserPatch, UserRepository,
    UserRole,
};

/// 运营商 + 车队规模
#[derive(Debug, Clone, Serialize)]
pub struct OperatorWithDetails {
    #[serde(flatten)]
    pub operator: Operator,
    pub truck_count: i64,
}

/// 车队内单台水车的读侧投影
#[derive(Debug, Clone, Serialize)]
pub struct FleetTruck {
    #[serde(flatten)]
    pub truck: Truck,
    pub queue_length: i64,
    pub estimated_delay_minutes: i64,
}

/// 运营商工作台：待指派/进行中订单 + 当前模式
#[derive(Debug, Clone, Serialize)]
pub struct OperatorDashboard {
    pub pending: Vec<OperatorPendingJob>,
    pub active: Vec<OperatorActiveJob>,
    pub mode: OperatorMode,
}

/// 运营商服务：档案管理与车队读侧聚合
///
/// 这里只做投影，订单的一切状态变更都走派发服务。
pub struct OperatorService {
    operator_repo: Arc<dyn OperatorRepository>,
    user_repo: Arc<dyn UserRepository>,
    truck_repo: Arc<dyn TruckRepository>,
    job_repo: Arc<dyn JobRepository>,
}

impl OperatorService {
    pub fn new(
        operator_repo: Arc<dyn OperatorRepository>,
        user_repo: Arc<dyn UserRepository>,
        truck_repo: Arc<dyn TruckRepository>,
        job_repo: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            operator_repo,
            user_repo,
            truck_repo,
            job_repo,
        }
    }

    /// 为用户开通运营商档案，初始为delegated模式
    pub async fn create_operator(
        &self,
        user_id: i64,
        service_area: Option<&str>,
    ) -> DispatchResult<OperatorWithDetails> {
        if self
            .operator_repo
            .find_by_user_id(user_id)
            .await?
            .is_some()
        {
            return Err(DispatchError::Conflict(format!(
                "用户 {user_id} 已是运营商"
            )));
        }

        self.user_repo
            .update(
                user_id,
                &UserPatch {
                    role: Some(UserRole::Operator),
                    ..UserPatch::default()
                },
            )
            .await?;

        let operator = self
            .operator_repo
            .create(user_id, OperatorMode::Delegated, service_area)
            .await?;

        info!("用户 {} 开通运营商档案 {}", user_id, operator.id);
        self.get_operator_with_details(operator.id).await
    }

    pub async fn get_operator_with_details(
        &self,
        operator_id: i64,
    ) -> DispatchResult<OperatorWithDetails> {
        let operator = self
            .operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;
        let truck_count = self.operator_repo.truck_count(operator_id).await?;
        Ok(OperatorWithDetails {
            operator,
            truck_count,
        })
    }

    pub async fn get_by_user(&self, user_id: i64) -> DispatchResult<Option<OperatorWithDetails>> {
        match self.operator_repo.find_by_user_id(user_id).await? {
            Some(operator) => Ok(Some(self.get_operator_with_details(operator.id).await?)),
            None => Ok(None),
        }
    }

    /// 切换 delegated / dispatcher 模式
    pub async fn set_mode(
        &self,
        operator_id: i64,
        mode: OperatorMode,
    ) -> DispatchResult<OperatorWithDetails> {
        self.operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;
        self.operator_repo.update_mode(operator_id, mode).await?;
        info!("运营商 {} 切换为 {} 模式", operator_id, mode.as_str());
        self.get_operator_with_details(operator_id).await
    }

    pub async fn update_service_area(
        &self,
        operator_id: i64,
        service_area: &str,
    ) -> DispatchResult<OperatorWithDetails> {
        self.operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;
        self.operator_repo
            .update_service_area(operator_id, service_area)
            .await?;
        self.get_operator_with_details(operator_id).await
    }

    /// 车队列表，带实时排队与ETA标注
    pub async fn get_trucks(&self, operator_id: i64) -> DispatchResult<Vec<FleetTruck>> {
        let trucks = self.truck_repo.find_by_operator_id(operator_id).await?;
        let mut fleet = Vec::with_capacity(trucks.len());
        for truck in trucks {
            let queue_length = self.truck_repo.queue_length(truck.id).await?;
            fleet.push(FleetTruck {
                estimated_delay_minutes: queue_length * i64::from(truck.avg_job_minutes),
                queue_length,
                truck,
            });
        }
        Ok(fleet)
    }

    /// 运营商订单工作台
    pub async fn get_jobs(&self, operator_id: i64) -> DispatchResult<OperatorDashboard> {
        let operator = self
            .operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;

        Ok(OperatorDashboard {
            pending: self.job_repo.find_pending_by_operator(operator_id).await?,
            active: self.job_repo.find_active_by_operator(operator_id).await?,
            mode: operator.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_dispatch::JobDispatchService;
    use crate::test_utils::{builders::TruckBuilder, InMemoryStore, NullFanout};
    use watertruck_domain::{JobStatus, NewJob};

    fn service(store: &InMemoryStore) -> OperatorService {
        OperatorService::new(
            store.operator_repo(),
            store.user_repo(),
            store.truck_repo(),
            store.job_repo(),
        )
    }

    #[tokio::test]
    async fn test_create_operator_once() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let user = store.user_repo().create("device-op").await.unwrap();

        let operator = svc
            .create_operator(user.id, Some("Port of Spain"))
            .await
            .unwrap();
        assert_eq!(operator.operator.mode, OperatorMode::Delegated);
        assert_eq!(operator.truck_count, 0);

        let err = svc.create_operator(user.id, None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        let user = store
            .user_repo()
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, UserRole::Operator);
    }

    #[tokio::test]
    async fn test_set_mode_and_missing_operator() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);

        let updated = svc
            .set_mode(operator_id, OperatorMode::Dispatcher)
            .await
            .unwrap();
        assert_eq!(updated.operator.mode, OperatorMode::Dispatcher);

        let err = svc
            .set_mode(999, OperatorMode::Delegated)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::OperatorNotFound { id: 999 }));
    }

    #[tokio::test]
    async fn test_fleet_view_with_queue() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let operator_id = store.insert_operator(7, OperatorMode::Delegated);
        store.insert_truck(
            TruckBuilder::new()
                .with_id(1)
                .with_user_id(101)
                .with_name("alpha")
                .with_avg_minutes(20)
                .with_operator(operator_id)
                .active()
                .build(),
        );
        store.insert_job_for_truck(1, JobStatus::Accepted);
        store.insert_job_for_truck(1, JobStatus::EnRoute);

        let fleet = svc.get_trucks(operator_id).await.unwrap();
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet[0].queue_length, 2);
        assert_eq!(fleet[0].estimated_delay_minutes, 40);
    }

    #[tokio::test]
    async fn test_dashboard_pending_and_active() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let operator_id = store.insert_operator(7, OperatorMode::Dispatcher);
        store.insert_truck(
            TruckBuilder::new()
                .with_id(1)
                .with_user_id(101)
                .with_name("fleet-1")
                .with_price(45.0)
                .with_operator(operator_id)
                .active()
                .build(),
        );
        store.insert_truck(
            TruckBuilder::new()
                .with_id(2)
                .with_user_id(102)
                .with_name("independent")
                .with_price(45.0)
                .active()
                .build(),
        );

        let dispatch = JobDispatchService::new(
            store.job_repo(),
            store.request_repo(),
            store.truck_repo(),
            store.operator_repo(),
            Some(Arc::new(NullFanout)),
        );

        // 一单发给车队的车，一单只发给独立车
        let fleet_job = dispatch
            .create_job(
                NewJob {
                    customer_user_id: 1,
                    location: "A".to_string(),
                    customer_name: None,
                    customer_phone: None,
                    lat: None,
                    lng: None,
                },
                &[1, 2],
            )
            .await
            .unwrap();
        dispatch
            .create_job(
                NewJob {
                    customer_user_id: 1,
                    location: "B".to_string(),
                    customer_name: None,
                    customer_phone: None,
                    lat: None,
                    lng: None,
                },
                &[2],
            )
            .await
            .unwrap();

        let dashboard = svc.get_jobs(operator_id).await.unwrap();
        assert_eq!(dashboard.mode, OperatorMode::Dispatcher);
        assert_eq!(dashboard.pending.len(), 1);
        assert_eq!(dashboard.pending[0].job.id, fleet_job.job.id);
        assert!(dashboard.active.is_empty());

        // 车队的车接单后进入active
        dispatch.accept_job(fleet_job.job.id, 1).await.unwrap();
        let dashboard = svc.get_jobs(operator_id).await.unwrap();
        assert!(dashboard.pending.is_empty());
        assert_eq!(dashboard.active.len(), 1);
        assert_eq!(dashboard.active[0].truck_name.as_deref(), Some("fleet-1"));
    }
}
