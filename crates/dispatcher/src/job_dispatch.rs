use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use watertruck_domain::{
    geo, DispatchError, DispatchResult, Job, JobRepository, JobRequestOffer,
    JobRequestRepository, JobRequestStatus, JobStatus, NewJob, OperatorRepository, TruckRepository,
};

use crate::notification_fanout::NotificationFanout;

/// 订单详情投影：订单 + 双方展示字段 + 全部请求 + 在途位置
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: Job,
    pub truck_name: Option<String>,
    pub truck_phone: Option<String>,
    pub truck_capacity_gallons: Option<i32>,
    pub customer_display_name: Option<String>,
    pub requests: Vec<JobRequestOffer>,
    /// 仅en_route且水车有定位时填充
    pub truck_location: Option<TruckLocationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruckLocationInfo {
    pub lat: f64,
    pub lng: f64,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<i64>,
}

/// 订单派发状态机
///
/// 订单生命周期: pending -> accepted -> en_route -> delivered，
/// pending/accepted可被客户取消，pending在全部请求被拒后自动过期。
/// 先接先得由仓储层的条件更新保证，这里负责前置校验和编排。
pub struct JobDispatchService {
    job_repo: Arc<dyn JobRepository>,
    request_repo: Arc<dyn JobRequestRepository>,
    truck_repo: Arc<dyn TruckRepository>,
    operator_repo: Arc<dyn OperatorRepository>,
    fanout: Option<Arc<dyn NotificationFanout>>,
}

impl JobDispatchService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        request_repo: Arc<dyn JobRequestRepository>,
        truck_repo: Arc<dyn TruckRepository>,
        operator_repo: Arc<dyn OperatorRepository>,
        fanout: Option<Arc<dyn NotificationFanout>>,
    ) -> Self {
        Self {
            job_repo,
            request_repo,
            truck_repo,
            operator_repo,
            fanout,
        }
    }

    /// 创建订单并向每台候选水车扇出一条pending请求
    pub async fn create_job(
        &self,
        new_job: NewJob,
        truck_ids: &[i64],
    ) -> DispatchResult<JobDetails> {
        if truck_ids.is_empty() {
            return Err(DispatchError::Validation(
                "至少需要选择一台水车".to_string(),
            ));
        }

        // 所有候选水车必须存在且在营
        for &truck_id in truck_ids {
            let truck = self
                .truck_repo
                .find_by_id(truck_id)
                .await?
                .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
            if !truck.is_active {
                return Err(DispatchError::Validation(format!(
                    "水车 {truck_id} 当前不可接单"
                )));
            }
        }

        let job = self.job_repo.create_with_requests(&new_job, truck_ids).await?;

        info!(
            "创建订单 {}，扇出 {} 条请求，地址: {}",
            job.id,
            truck_ids.len(),
            job.location
        );

        self.get_job_with_details(job.id).await
    }

    /// 水车接单，先接先得
    ///
    /// 获胜的工作单元同时落定：请求accepted、订单accepted、
    /// 价格锁定、其余pending请求expired。竞争失败返回Conflict。
    pub async fn accept_job(&self, job_id: i64, truck_id: i64) -> DispatchResult<JobDetails> {
        let job = self.require_job(job_id).await?;

        if job.status != JobStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "订单 {} 已不可接单（当前状态: {}）",
                job_id,
                job.status.as_str()
            )));
        }

        let request = self
            .request_repo
            .find_by_job_and_truck(job_id, truck_id)
            .await?
            .ok_or(DispatchError::JobRequestNotFound { job_id, truck_id })?;

        if request.status != JobRequestStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "订单 {} 的请求已处理（当前状态: {}）",
                job_id,
                request.status.as_str()
            )));
        }

        let truck = self
            .truck_repo
            .find_by_id(truck_id)
            .await?
            .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
        let price = truck.price_fixed.ok_or_else(|| {
            DispatchError::Conflict(format!("水车 {truck_id} 尚未设置报价，无法接单"))
        })?;

        let won = self
            .job_repo
            .try_accept(job_id, request.id, truck_id, price)
            .await?;

        if !won {
            debug!("水车 {} 接单失败，订单 {} 已被抢走", truck_id, job_id);
            return Err(DispatchError::Conflict(format!(
                "订单 {job_id} 已被其他水车接走"
            )));
        }

        info!(
            "水车 {} 接下订单 {}，锁定价格 {:.2}",
            truck_id, job_id, price
        );

        self.get_job_with_details(job_id).await
    }

    /// 水车拒单；若此后订单已无pending请求，订单自动过期
    pub async fn reject_job(&self, job_id: i64, truck_id: i64) -> DispatchResult<JobDetails> {
        self.require_job(job_id).await?;

        let request = self
            .request_repo
            .find_by_job_and_truck(job_id, truck_id)
            .await?
            .ok_or(DispatchError::JobRequestNotFound { job_id, truck_id })?;

        if request.status != JobRequestStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "订单 {} 的请求已处理（当前状态: {}）",
                job_id,
                request.status.as_str()
            )));
        }

        if !self.request_repo.mark_rejected(request.id).await? {
            return Err(DispatchError::Conflict(format!(
                "订单 {job_id} 的请求已被并发处理"
            )));
        }

        if self.request_repo.pending_count(job_id).await? == 0 {
            // 最后一台候选也拒绝了，订单过期（条件迁移，竞争时静默跳过）
            if self
                .job_repo
                .transition(job_id, JobStatus::Pending, JobStatus::Expired)
                .await?
            {
                info!("订单 {} 的全部请求均被拒绝，已过期", job_id);
            }
        }

        self.get_job_with_details(job_id).await
    }

    /// 接单水车推进订单状态（en_route / delivered / cancelled）
    ///
    /// 迁移到en_route时触发客户侧"已取水"通知；通知失败只记日志，
    /// 不影响状态更新本身。
    pub async fn update_status(
        &self,
        job_id: i64,
        new_status: JobStatus,
        by_truck_id: i64,
    ) -> DispatchResult<JobDetails> {
        let job = self.require_job(job_id).await?;

        if job.truck_id != Some(by_truck_id) {
            return Err(DispatchError::Authorization(format!(
                "水车 {by_truck_id} 无权更新订单 {job_id}"
            )));
        }

        let allowed = matches!(
            (job.status, new_status),
            (JobStatus::Accepted, JobStatus::EnRoute)
                | (JobStatus::Accepted, JobStatus::Cancelled)
                | (JobStatus::EnRoute, JobStatus::Delivered)
                | (JobStatus::EnRoute, JobStatus::Cancelled)
        );
        if !allowed {
            return Err(DispatchError::InvalidTransition {
                from: job.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        if !self.job_repo.transition(job_id, job.status, new_status).await? {
            return Err(DispatchError::Conflict(format!(
                "订单 {job_id} 状态已变化，请重试"
            )));
        }

        info!(
            "订单 {} 状态: {} -> {}",
            job_id,
            job.status.as_str(),
            new_status.as_str()
        );

        if new_status == JobStatus::EnRoute {
            if let Some(fanout) = &self.fanout {
                // 尽力而为：通知失败不能让状态更新失败
                if let Err(e) = fanout.notify_delivery_started(job_id).await {
                    warn!("订单 {} 的取水通知发送失败: {}", job_id, e);
                }
            }
        }

        self.get_job_with_details(job_id).await
    }

    /// 客户取消订单，仅限水车出发之前
    pub async fn cancel_by_customer(
        &self,
        job_id: i64,
        customer_user_id: i64,
    ) -> DispatchResult<JobDetails> {
        let job = self.require_job(job_id).await?;

        if job.customer_user_id != customer_user_id {
            return Err(DispatchError::Authorization(format!(
                "用户 {customer_user_id} 无权取消订单 {job_id}"
            )));
        }

        if !job.status.is_customer_cancellable() {
            return Err(DispatchError::Conflict(format!(
                "订单 {} 的配送已开始，无法取消（当前状态: {}）",
                job_id,
                job.status.as_str()
            )));
        }

        if !self.job_repo.cancel_with_requests(job_id).await? {
            return Err(DispatchError::Conflict(format!(
                "订单 {job_id} 状态已变化，请重试"
            )));
        }

        info!("客户 {} 取消了订单 {}", customer_user_id, job_id);

        self.get_job_with_details(job_id).await
    }

    /// 运营商手动指派（dispatcher模式）
    ///
    /// 指派即"强制接单"：没有请求就先补一条，然后走接单路径，
    /// 与水车自行接单共用同一条竞争仲裁。
    pub async fn assign_job(
        &self,
        job_id: i64,
        truck_id: i64,
        operator_id: i64,
    ) -> DispatchResult<JobDetails> {
        let job = self.require_job(job_id).await?;

        if job.status != JobStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "订单 {} 已不在待指派状态（当前状态: {}）",
                job_id,
                job.status.as_str()
            )));
        }

        let truck = self
            .truck_repo
            .find_by_id(truck_id)
            .await?
            .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
        if truck.operator_id != Some(operator_id) {
            return Err(DispatchError::Authorization(format!(
                "水车 {truck_id} 不属于运营商 {operator_id}"
            )));
        }

        let operator = self
            .operator_repo
            .find_by_id(operator_id)
            .await?
            .ok_or(DispatchError::OperatorNotFound { id: operator_id })?;
        if !operator.is_dispatcher() {
            return Err(DispatchError::Authorization(format!(
                "运营商 {operator_id} 未处于dispatcher模式"
            )));
        }

        if self
            .request_repo
            .find_by_job_and_truck(job_id, truck_id)
            .await?
            .is_none()
        {
            self.request_repo.create(job_id, truck_id).await?;
            debug!("为指派补建订单 {} 到水车 {} 的请求", job_id, truck_id);
        }

        self.accept_job(job_id, truck_id).await
    }

    /// 订单详情；en_route且有定位时附带实时距离与ETA
    pub async fn get_job_with_details(&self, job_id: i64) -> DispatchResult<JobDetails> {
        let parties = self
            .job_repo
            .find_with_parties(job_id)
            .await?
            .ok_or(DispatchError::JobNotFound { id: job_id })?;

        let requests = self.request_repo.find_by_job(job_id).await?;

        let mut truck_location = None;
        if parties.job.status == JobStatus::EnRoute {
            if let Some(truck_id) = parties.job.truck_id {
                let truck = self
                    .truck_repo
                    .find_by_id(truck_id)
                    .await?
                    .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
                if let Some(point) = truck.location() {
                    let mut info = TruckLocationInfo {
                        lat: point.lat,
                        lng: point.lng,
                        updated_at: truck.location_updated_at,
                        distance_km: None,
                        eta_minutes: None,
                    };
                    if let Some(customer) = parties.job.location_point() {
                        let distance = geo::haversine_km(point, customer);
                        info.distance_km = Some((distance * 100.0).round() / 100.0);
                        info.eta_minutes = Some(geo::eta_minutes(distance));
                    }
                    truck_location = Some(info);
                }
            }
        }

        Ok(JobDetails {
            job: parties.job,
            truck_name: parties.truck_name,
            truck_phone: parties.truck_phone,
            truck_capacity_gallons: parties.truck_capacity_gallons,
            customer_display_name: parties.customer_display_name,
            requests,
            truck_location,
        })
    }

    /// 客户的历史订单
    pub async fn get_customer_jobs(&self, customer_user_id: i64) -> DispatchResult<Vec<Job>> {
        self.job_repo.find_by_customer(customer_user_id).await
    }

    async fn require_job(&self, job_id: i64) -> DispatchResult<Job> {
        self.job_repo
            .find_by_id(job_id)
            .await?
            .ok_or(DispatchError::JobNotFound { id: job_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        builders::TruckBuilder, InMemoryStore, NullFanout, RecordingFanout,
    };
    use watertruck_domain::OperatorMode;

    fn new_job(customer: i64) -> NewJob {
        NewJob {
            customer_user_id: customer,
            location: "123 Main St".to_string(),
            customer_name: None,
            customer_phone: None,
            lat: None,
            lng: None,
        }
    }

    fn service(store: &InMemoryStore) -> JobDispatchService {
        JobDispatchService::new(
            store.job_repo(),
            store.request_repo(),
            store.truck_repo(),
            store.operator_repo(),
            Some(Arc::new(NullFanout)),
        )
    }

    async fn seed_trucks(store: &InMemoryStore, ids: &[i64]) {
        for &id in ids {
            store.insert_truck(
                TruckBuilder::new()
                    .with_id(id)
                    .with_name(&format!("truck-{id}"))
                    .with_user_id(100 + id)
                    .with_price(45.0)
                    .active()
                    .build(),
            );
        }
    }

    #[tokio::test]
    async fn test_create_job_fans_out_to_all_candidates() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11, 12]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11, 12]).await.unwrap();

        assert_eq!(details.job.status, JobStatus::Pending);
        assert_eq!(details.requests.len(), 3);
        assert!(details
            .requests
            .iter()
            .all(|r| r.request.status == JobRequestStatus::Pending));
    }

    #[tokio::test]
    async fn test_create_job_rejects_empty_candidate_list() {
        let store = InMemoryStore::new();
        let svc = service(&store);

        let err = svc.create_job(new_job(1), &[]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_job_rejects_unknown_or_inactive_truck() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10]).await;
        store.insert_truck(TruckBuilder::new().with_id(20).with_user_id(120).build()); // 未激活
        let svc = service(&store);

        let err = svc.create_job(new_job(1), &[10, 99]).await.unwrap_err();
        assert!(matches!(err, DispatchError::TruckNotFound { id: 99 }));

        let err = svc.create_job(new_job(1), &[10, 20]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_accept_locks_price_and_expires_siblings() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11, 12]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11, 12]).await.unwrap();
        let job_id = details.job.id;

        let accepted = svc.accept_job(job_id, 11).await.unwrap();
        assert_eq!(accepted.job.status, JobStatus::Accepted);
        assert_eq!(accepted.job.truck_id, Some(11));
        assert_eq!(accepted.job.price, Some(45.0));
        assert!(accepted.job.accepted_at.is_some());

        for offer in &accepted.requests {
            if offer.request.truck_id == 11 {
                assert_eq!(offer.request.status, JobRequestStatus::Accepted);
            } else {
                assert_eq!(offer.request.status, JobRequestStatus::Expired);
            }
        }

        // 后到的接单请求必须失败
        let err = svc.accept_job(job_id, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_accept_requires_configured_price() {
        let store = InMemoryStore::new();
        store.insert_truck(
            TruckBuilder::new()
                .with_id(10)
                .with_name("no-price")
                .with_user_id(110)
                .active()
                .build(),
        );
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10]).await.unwrap();
        let err = svc.accept_job(details.job.id, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_accept_unknown_request_is_not_found() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10]).await.unwrap();
        // 水车11没有收到请求
        let err = svc.accept_job(details.job.id, 11).await.unwrap_err();
        assert!(matches!(err, DispatchError::JobRequestNotFound { .. }));

        let err = svc.accept_job(9999, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::JobNotFound { id: 9999 }));
    }

    #[tokio::test]
    async fn test_concurrent_accept_exactly_one_winner() {
        let store = InMemoryStore::new();
        let truck_ids: Vec<i64> = (1..=8).collect();
        seed_trucks(&store, &truck_ids).await;
        let svc = Arc::new(service(&store));

        let details = svc.create_job(new_job(1), &truck_ids).await.unwrap();
        let job_id = details.job.id;

        let mut handles = Vec::new();
        for &truck_id in &truck_ids {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(
                async move { svc.accept_job(job_id, truck_id).await },
            ));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(DispatchError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(conflicts, truck_ids.len() - 1);

        // 赢家的价格和车号已锁定，其余请求全部过期
        let after = svc.get_job_with_details(job_id).await.unwrap();
        assert_eq!(after.job.status, JobStatus::Accepted);
        assert!(after.job.truck_id.is_some());
        assert_eq!(after.job.price, Some(45.0));
        let accepted_count = after
            .requests
            .iter()
            .filter(|r| r.request.status == JobRequestStatus::Accepted)
            .count();
        assert_eq!(accepted_count, 1);
    }

    #[tokio::test]
    async fn test_reject_non_last_request_keeps_job_pending() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        let after = svc.reject_job(details.job.id, 10).await.unwrap();

        assert_eq!(after.job.status, JobStatus::Pending);
        let rejected = after
            .requests
            .iter()
            .find(|r| r.request.truck_id == 10)
            .unwrap();
        assert_eq!(rejected.request.status, JobRequestStatus::Rejected);
    }

    #[tokio::test]
    async fn test_reject_last_request_expires_job() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        svc.reject_job(details.job.id, 10).await.unwrap();
        let after = svc.reject_job(details.job.id, 11).await.unwrap();

        assert_eq!(after.job.status, JobStatus::Expired);
    }

    #[tokio::test]
    async fn test_reject_twice_is_conflict() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        svc.reject_job(details.job.id, 10).await.unwrap();
        let err = svc.reject_job(details.job.id, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_status_authorization_and_transitions() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        let job_id = details.job.id;
        svc.accept_job(job_id, 10).await.unwrap();

        // 非接单水车无权更新
        let err = svc
            .update_status(job_id, JobStatus::EnRoute, 11)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Authorization(_)));

        // accepted -> delivered 不在迁移表中
        let err = svc
            .update_status(job_id, JobStatus::Delivered, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
        assert_eq!(
            svc.get_job_with_details(job_id).await.unwrap().job.status,
            JobStatus::Accepted
        );

        // 合法链路 accepted -> en_route -> delivered
        let after = svc.update_status(job_id, JobStatus::EnRoute, 10).await.unwrap();
        assert_eq!(after.job.status, JobStatus::EnRoute);
        let after = svc
            .update_status(job_id, JobStatus::Delivered, 10)
            .await
            .unwrap();
        assert_eq!(after.job.status, JobStatus::Delivered);
        assert!(after.job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_en_route_triggers_customer_notification() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10]).await;
        let fanout = Arc::new(RecordingFanout::new());
        let svc = JobDispatchService::new(
            store.job_repo(),
            store.request_repo(),
            store.truck_repo(),
            store.operator_repo(),
            Some(fanout.clone()),
        );

        let details = svc.create_job(new_job(1), &[10]).await.unwrap();
        svc.accept_job(details.job.id, 10).await.unwrap();
        svc.update_status(details.job.id, JobStatus::EnRoute, 10)
            .await
            .unwrap();

        assert_eq!(fanout.delivery_started_jobs(), vec![details.job.id]);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_status_update() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10]).await;
        let fanout = Arc::new(RecordingFanout::failing());
        let svc = JobDispatchService::new(
            store.job_repo(),
            store.request_repo(),
            store.truck_repo(),
            store.operator_repo(),
            Some(fanout),
        );

        let details = svc.create_job(new_job(1), &[10]).await.unwrap();
        svc.accept_job(details.job.id, 10).await.unwrap();
        let after = svc
            .update_status(details.job.id, JobStatus::EnRoute, 10)
            .await
            .unwrap();
        assert_eq!(after.job.status, JobStatus::EnRoute);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let store = InMemoryStore::new();
        seed_trucks(&store, &[10, 11]).await;
        let svc = service(&store);

        // pending可取消，且pending请求全部过期
        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        let cancelled = svc.cancel_by_customer(details.job.id, 1).await.unwrap();
        assert_eq!(cancelled.job.status, JobStatus::Cancelled);
        assert!(cancelled
            .requests
            .iter()
            .all(|r| r.request.status == JobRequestStatus::Expired));

        // 他人无权取消
        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        let err = svc.cancel_by_customer(details.job.id, 2).await.unwrap_err();
        assert!(matches!(err, DispatchError::Authorization(_)));

        // accepted仍可取消
        svc.accept_job(details.job.id, 10).await.unwrap();
        let cancelled = svc.cancel_by_customer(details.job.id, 1).await.unwrap();
        assert_eq!(cancelled.job.status, JobStatus::Cancelled);

        // en_route后不可取消
        let details = svc.create_job(new_job(1), &[10, 11]).await.unwrap();
        svc.accept_job(details.job.id, 10).await.unwrap();
        svc.update_status(details.job.id, JobStatus::EnRoute, 10)
            .await
            .unwrap();
        let err = svc.cancel_by_customer(details.job.id, 1).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_assign_job_dispatcher_path() {
        let store = InMemoryStore::new();
        let operator_id = store.insert_operator(7, OperatorMode::Dispatcher);
        store.insert_truck(
            TruckBuilder::new()
                .with_id(10)
                .with_name("fleet-truck")
                .with_user_id(110)
                .with_price(60.0)
                .with_operator(operator_id)
                .active()
                .build(),
        );
        seed_trucks(&store, &[11]).await;
        let svc = service(&store);

        // 候选里只有11，指派给车队的10：请求被补建后强制接单
        let details = svc.create_job(new_job(1), &[11]).await.unwrap();
        let assigned = svc.assign_job(details.job.id, 10, operator_id).await.unwrap();

        assert_eq!(assigned.job.status, JobStatus::Accepted);
        assert_eq!(assigned.job.truck_id, Some(10));
        assert_eq!(assigned.job.price, Some(60.0));
        // 原候选11的pending请求已随接单过期
        let other = assigned
            .requests
            .iter()
            .find(|r| r.request.truck_id == 11)
            .unwrap();
        assert_eq!(other.request.status, JobRequestStatus::Expired);
    }

    #[tokio::test]
    async fn test_assign_job_requires_dispatcher_mode_and_ownership() {
        let store = InMemoryStore::new();
        let delegated_op = store.insert_operator(7, OperatorMode::Delegated);
        let dispatcher_op = store.insert_operator(8, OperatorMode::Dispatcher);
        store.insert_truck(
            TruckBuilder::new()
                .with_id(10)
                .with_name("fleet-truck")
                .with_user_id(110)
                .with_price(60.0)
                .with_operator(delegated_op)
                .active()
                .build(),
        );
        seed_trucks(&store, &[11]).await;
        let svc = service(&store);

        let details = svc.create_job(new_job(1), &[11]).await.unwrap();

        // delegated模式不能手动指派
        let err = svc
            .assign_job(details.job.id, 10, delegated_op)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Authorization(_)));

        // 不是自家车队的车
        let err = svc
            .assign_job(details.job.id, 10, dispatcher_op)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_details_include_eta_when_en_route() {
        let store = InMemoryStore::new();
        store.insert_truck(
            TruckBuilder::new()
                .with_id(10)
                .with_name("gps-truck")
                .with_user_id(110)
                .with_price(45.0)
                .with_location(10.70, -61.50)
                .active()
                .build(),
        );
        let svc = service(&store);

        let mut job = new_job(1);
        job.lat = Some(10.65);
        job.lng = Some(-61.50);
        let details = svc.create_job(job, &[10]).await.unwrap();

        // pending阶段不暴露位置
        assert!(details.truck_location.is_none());

        svc.accept_job(details.job.id, 10).await.unwrap();
        let after = svc
            .update_status(details.job.id, JobStatus::EnRoute, 10)
            .await
            .unwrap();

        let loc = after.truck_location.expect("en_route应附带位置");
        assert_eq!(loc.lat, 10.70);
        let distance = loc.distance_km.unwrap();
        // 0.05度纬差约5.6公里
        assert!((distance - 5.56).abs() < 0.1, "distance was {distance}");
        assert_eq!(loc.eta_minutes, Some(12)); // ceil(5.56 / 30 * 60)
    }
}
