use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use watertruck_domain::{
    geo, DispatchError, DispatchResult, GeoPoint, Job, JobRepository, JobRequestRepository,
    OperatorMode, PendingOffer, Truck, TruckPatch, TruckRepository, UserPatch, UserRepository,
    UserRole,
};

/// 可接单解析的配置参数
#[derive(Debug, Clone)]
pub struct TruckAvailabilityConfig {
    pub offline_timeout_minutes: i64,
    pub max_distance_km: f64,
    pub default_avg_job_minutes: i32,
}

/// 对外展示的可接单水车
#[derive(Debug, Clone, Serialize)]
pub struct AvailableTruck {
    #[serde(flatten)]
    pub truck: Truck,
    pub queue_length: i64,
    pub operator_mode: Option<OperatorMode>,
    pub estimated_delay_minutes: i64,
    pub eta_text: String,
}

/// 水车 + 排队信息
#[derive(Debug, Clone, Serialize)]
pub struct TruckSummary {
    #[serde(flatten)]
    pub truck: Truck,
    pub queue_length: i64,
    pub estimated_delay_minutes: i64,
}

/// 水车工作台数据
#[derive(Debug, Clone, Serialize)]
pub struct TruckJobs {
    pub pending_requests: Vec<PendingOffer>,
    pub jobs: Vec<Job>,
}

/// 水车资料更新入参（None表示不修改）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TruckUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub capacity_gallons: Option<i32>,
    pub price_fixed: Option<f64>,
    pub avg_job_minutes: Option<i32>,
    pub is_active: Option<bool>,
}

/// 水车服务：可接单解析与水车生命周期
///
/// 可接单列表每次都先做一次惰性离线清扫，再按
/// (排队长度升序, 名称升序)给出带ETA标注的结果。
pub struct TruckService {
    truck_repo: Arc<dyn TruckRepository>,
    user_repo: Arc<dyn UserRepository>,
    job_repo: Arc<dyn JobRepository>,
    request_repo: Arc<dyn JobRequestRepository>,
    config: TruckAvailabilityConfig,
}

impl TruckService {
    pub fn new(
        truck_repo: Arc<dyn TruckRepository>,
        user_repo: Arc<dyn UserRepository>,
        job_repo: Arc<dyn JobRepository>,
        request_repo: Arc<dyn JobRequestRepository>,
        config: TruckAvailabilityConfig,
    ) -> Self {
        Self {
            truck_repo,
            user_repo,
            job_repo,
            request_repo,
            config,
        }
    }

    /// 实时可接单水车列表
    ///
    /// 提供客户定位时按最大服务距离过滤；没有GPS的水车不因此
    /// 被排除（缺定位不是过错）。
    pub async fn get_available(
        &self,
        customer_location: Option<GeoPoint>,
    ) -> DispatchResult<Vec<AvailableTruck>> {
        let cutoff = Utc::now() - Duration::minutes(self.config.offline_timeout_minutes);

        // 惰性清扫：把心跳过期的水车持久地置为停用
        let swept = self.truck_repo.deactivate_stale(cutoff).await?;
        if swept > 0 {
            info!("离线清扫停用了 {} 台心跳过期的水车", swept);
        }

        let mut rows = self.truck_repo.list_available(cutoff).await?;

        if let Some(customer) = customer_location {
            rows.retain(|row| match row.truck.location() {
                Some(truck_location) => {
                    geo::haversine_km(truck_location, customer) <= self.config.max_distance_km
                }
                None => true,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let estimated = row.queue_length * i64::from(row.truck.avg_job_minutes);
                let eta_text = format_eta_text(row.queue_length, row.truck.avg_job_minutes);
                AvailableTruck {
                    queue_length: row.queue_length,
                    operator_mode: row.operator_mode,
                    estimated_delay_minutes: estimated,
                    eta_text,
                    truck: row.truck,
                }
            })
            .collect())
    }

    /// 用户自助注册为水车
    pub async fn register(&self, user_id: i64) -> DispatchResult<Truck> {
        if self.truck_repo.find_by_user_id(user_id).await?.is_some() {
            return Err(DispatchError::Conflict(format!(
                "用户 {user_id} 已拥有水车"
            )));
        }

        self.user_repo
            .update(
                user_id,
                &UserPatch {
                    role: Some(UserRole::Truck),
                    ..UserPatch::default()
                },
            )
            .await?;

        let truck = self
            .truck_repo
            .create(user_id, None, self.config.default_avg_job_minutes)
            .await?;

        info!("用户 {} 注册了水车 {}", user_id, truck.id);
        Ok(truck)
    }

    /// 更新水车资料
    ///
    /// 激活校验针对合并后的状态（库里已有的 + 本次提交的），
    /// 而不是只看本次补丁。
    pub async fn update_truck(
        &self,
        truck_id: i64,
        update: TruckUpdate,
    ) -> DispatchResult<TruckSummary> {
        let truck = self
            .truck_repo
            .find_by_id(truck_id)
            .await?
            .ok_or(DispatchError::TruckNotFound { id: truck_id })?;

        let mut patch = TruckPatch::default();

        let mut merged_name = truck.name.clone();
        let mut merged_phone = truck.phone.clone();
        let mut merged_capacity = truck.capacity_gallons;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            merged_name = Some(name.clone());
            patch.name = Some(name);
        }
        if let Some(phone) = update.phone {
            let phone = phone.trim().to_string();
            merged_phone = Some(phone.clone());
            patch.phone = Some(phone);
        }
        if let Some(capacity) = update.capacity_gallons {
            if capacity <= 0 {
                return Err(DispatchError::Validation("容量必须为正数".to_string()));
            }
            merged_capacity = Some(capacity);
            patch.capacity_gallons = Some(capacity);
        }
        if let Some(price) = update.price_fixed {
            if price < 0.0 {
                return Err(DispatchError::Validation("价格不能为负数".to_string()));
            }
            patch.price_fixed = Some(price);
        }
        if let Some(minutes) = update.avg_job_minutes {
            if minutes <= 0 {
                return Err(DispatchError::Validation(
                    "平均接单时长必须为正数".to_string(),
                ));
            }
            patch.avg_job_minutes = Some(minutes);
        }
        if let Some(active) = update.is_active {
            if active {
                let complete = merged_name.as_deref().is_some_and(|s| !s.is_empty())
                    && merged_phone.as_deref().is_some_and(|s| !s.is_empty())
                    && merged_capacity.is_some();
                if !complete {
                    return Err(DispatchError::Validation(
                        "激活前必须填写名称、电话和容量".to_string(),
                    ));
                }
            }
            patch.is_active = Some(active);
        }

        if !patch.is_empty() {
            self.truck_repo.update(truck_id, &patch).await?;
            debug!("更新水车 {} 资料", truck_id);
        }

        self.get_truck_with_queue(truck_id).await
    }

    pub async fn get_truck_with_queue(&self, truck_id: i64) -> DispatchResult<TruckSummary> {
        let truck = self
            .truck_repo
            .find_by_id(truck_id)
            .await?
            .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
        let queue_length = self.truck_repo.queue_length(truck_id).await?;
        Ok(TruckSummary {
            estimated_delay_minutes: queue_length * i64::from(truck.avg_job_minutes),
            queue_length,
            truck,
        })
    }

    /// 水车侧心跳：刷新last_seen
    pub async fn heartbeat(&self, truck_id: i64) -> DispatchResult<()> {
        self.truck_repo.touch_last_seen(truck_id).await
    }

    /// 上报GPS位置（同时视作一次心跳）
    pub async fn update_location(&self, truck_id: i64, point: GeoPoint) -> DispatchResult<()> {
        self.truck_repo
            .find_by_id(truck_id)
            .await?
            .ok_or(DispatchError::TruckNotFound { id: truck_id })?;
        self.truck_repo.update_location(truck_id, point).await
    }

    /// 水车工作台：待处理请求 + 名下订单
    pub async fn get_truck_jobs(&self, truck_id: i64) -> DispatchResult<TruckJobs> {
        let pending_requests = self.request_repo.find_pending_by_truck(truck_id).await?;
        let jobs = self.job_repo.find_by_truck(truck_id, None).await?;
        Ok(TruckJobs {
            pending_requests,
            jobs,
        })
    }
}

/// 排队ETA的人话表述
///
/// 空队列给"Available now"；一小时内给分钟区间；
/// 以上给小时区间。
fn format_eta_text(queue_length: i64, avg_minutes: i32) -> String {
    if queue_length == 0 {
        return "Available now".to_string();
    }

    let min_minutes = queue_length * i64::from(avg_minutes);
    let max_minutes = (queue_length + 1) * i64::from(avg_minutes);

    if min_minutes < 60 {
        return format!("{min_minutes}-{max_minutes} minutes");
    }

    let min_hours = min_minutes / 60;
    let max_hours = (max_minutes + 59) / 60;

    if min_hours == max_hours {
        let plural = if min_hours > 1 { "s" } else { "" };
        return format!("~{min_hours} hour{plural}");
    }

    format!("{min_hours}-{max_hours} hours")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{builders::TruckBuilder, InMemoryStore};
    use watertruck_domain::JobStatus;

    fn config() -> TruckAvailabilityConfig {
        TruckAvailabilityConfig {
            offline_timeout_minutes: 30,
            max_distance_km: 50.0,
            default_avg_job_minutes: 30,
        }
    }

    fn service(store: &InMemoryStore) -> TruckService {
        TruckService::new(
            store.truck_repo(),
            store.user_repo(),
            store.job_repo(),
            store.request_repo(),
            config(),
        )
    }

    fn ready_truck(id: i64, name: &str) -> Truck {
        TruckBuilder::new()
            .with_id(id)
            .with_user_id(100 + id)
            .with_name(name)
            .with_phone("555-0101")
            .with_capacity(400)
            .with_avg_minutes(20)
            .active()
            .build()
    }

    #[test]
    fn test_eta_text_bands() {
        assert_eq!(format_eta_text(0, 20), "Available now");
        assert_eq!(format_eta_text(2, 20), "40-60 minutes");
        assert_eq!(format_eta_text(1, 20), "20-40 minutes");
        // 60分钟起进入小时区间
        assert_eq!(format_eta_text(2, 30), "1-2 hours");
        assert_eq!(format_eta_text(3, 60), "3-4 hours");
    }

    #[tokio::test]
    async fn test_available_ordering_and_annotation() {
        let store = InMemoryStore::new();
        store.insert_truck(ready_truck(1, "zeta"));
        store.insert_truck(ready_truck(2, "alpha"));
        store.insert_truck(ready_truck(3, "beta"));
        // zeta空闲；alpha排2单；beta排1单
        store.insert_job_for_truck(2, JobStatus::Accepted);
        store.insert_job_for_truck(2, JobStatus::EnRoute);
        store.insert_job_for_truck(3, JobStatus::Accepted);
        // delivered不计入排队
        store.insert_job_for_truck(3, JobStatus::Delivered);

        let svc = service(&store);
        let list = svc.get_available(None).await.unwrap();

        let names: Vec<_> = list
            .iter()
            .map(|t| t.truck.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["zeta", "beta", "alpha"]);

        assert_eq!(list[0].queue_length, 0);
        assert_eq!(list[0].estimated_delay_minutes, 0);
        assert_eq!(list[0].eta_text, "Available now");
        assert_eq!(list[2].queue_length, 2);
        assert_eq!(list[2].estimated_delay_minutes, 40);
        assert_eq!(list[2].eta_text, "40-60 minutes");
    }

    #[tokio::test]
    async fn test_available_sweeps_stale_trucks() {
        let store = InMemoryStore::new();
        let mut stale = ready_truck(1, "stale");
        stale.last_seen_at = Some(Utc::now() - Duration::minutes(31));
        store.insert_truck(stale);
        store.insert_truck(ready_truck(2, "fresh"));

        let svc = service(&store);
        let list = svc.get_available(None).await.unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].truck.name.as_deref(), Some("fresh"));
        // 清扫是持久副作用，不只是过滤
        assert!(!store.get_truck(1).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_incomplete_profile_is_not_listed() {
        let store = InMemoryStore::new();
        let mut no_phone = ready_truck(1, "no-phone");
        no_phone.phone = None;
        store.insert_truck(no_phone);

        let svc = service(&store);
        assert!(svc.get_available(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_distance_filter_boundaries() {
        let customer = GeoPoint {
            lat: 10.65,
            lng: -61.50,
        };
        let store = InMemoryStore::new();
        // 约49.9公里：保留
        let mut near = ready_truck(1, "near");
        near.current_lat = Some(10.65 + 0.4488);
        near.current_lng = Some(-61.50);
        store.insert_truck(near);
        // 约50.2公里：剔除
        let mut far = ready_truck(2, "far");
        far.current_lat = Some(10.65 + 0.4515);
        far.current_lng = Some(-61.50);
        store.insert_truck(far);
        // 无定位：永不剔除
        store.insert_truck(ready_truck(3, "no-gps"));

        let svc = service(&store);
        let list = svc.get_available(Some(customer)).await.unwrap();
        let names: Vec<_> = list
            .iter()
            .map(|t| t.truck.name.clone().unwrap())
            .collect();
        assert!(names.contains(&"near".to_string()));
        assert!(names.contains(&"no-gps".to_string()));
        assert!(!names.contains(&"far".to_string()));

        // 不带定位时不过滤
        let list = svc.get_available(None).await.unwrap();
        assert_eq!(list.len(), 3);
    }

    #[tokio::test]
    async fn test_register_rejects_second_truck() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let user = store.user_repo().create("device-a").await.unwrap();

        let truck = svc.register(user.id).await.unwrap();
        assert_eq!(truck.avg_job_minutes, 30);
        assert!(!truck.is_active);

        let err = svc.register(user.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        // 角色提示已更新
        let user = store
            .user_repo()
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, UserRole::Truck);
    }

    #[tokio::test]
    async fn test_activation_uses_merged_fields() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        // 库里已有名称，本次只补电话和容量
        let mut truck = TruckBuilder::new()
            .with_id(1)
            .with_user_id(101)
            .with_name("Blue Tank")
            .build();
        truck.is_active = false;
        store.insert_truck(truck);

        let summary = svc
            .update_truck(
                1,
                TruckUpdate {
                    phone: Some("555-0101".to_string()),
                    capacity_gallons: Some(400),
                    is_active: Some(true),
                    ..TruckUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(summary.truck.is_active);
    }

    #[tokio::test]
    async fn test_activation_rejected_when_merged_incomplete() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        // 没有名称，本次也没补
        store.insert_truck(TruckBuilder::new().with_id(1).with_user_id(101).build());

        let err = svc
            .update_truck(
                1,
                TruckUpdate {
                    phone: Some("555-0101".to_string()),
                    capacity_gallons: Some(400),
                    is_active: Some(true),
                    ..TruckUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(!store.get_truck(1).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_update_validation_rules() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        store.insert_truck(ready_truck(1, "truck"));

        for bad in [
            TruckUpdate {
                capacity_gallons: Some(0),
                ..TruckUpdate::default()
            },
            TruckUpdate {
                price_fixed: Some(-1.0),
                ..TruckUpdate::default()
            },
            TruckUpdate {
                avg_job_minutes: Some(0),
                ..TruckUpdate::default()
            },
        ] {
            let err = svc.update_truck(1, bad).await.unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)));
        }

        let err = svc.update_truck(999, TruckUpdate::default()).await.unwrap_err();
        assert!(matches!(err, DispatchError::TruckNotFound { id: 999 }));
    }

    #[tokio::test]
    async fn test_location_update_is_also_heartbeat() {
        let store = InMemoryStore::new();
        let svc = service(&store);
        let mut truck = ready_truck(1, "gps");
        truck.last_seen_at = None;
        store.insert_truck(truck);

        svc.update_location(
            1,
            GeoPoint {
                lat: 10.7,
                lng: -61.5,
            },
        )
        .await
        .unwrap();

        let truck = store.get_truck(1).unwrap();
        assert_eq!(truck.current_lat, Some(10.7));
        assert!(truck.last_seen_at.is_some());
        assert!(truck.location_updated_at.is_some());

        let err = svc
            .update_location(
                999,
                GeoPoint {
                    lat: 0.0,
                    lng: 0.0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TruckNotFound { id: 999 }));
    }
}
