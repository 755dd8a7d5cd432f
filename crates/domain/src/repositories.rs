//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口。跨多行的工作单元（订单+订单请求）
//! 以组合操作的形式收敛在仓储边界之内，由实现方保证原子性。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::{
    Invite, Job, JobRequest, JobStatus, NewJob, NotificationQueueEntry, Operator, OperatorMode,
    PushSubscription, Truck, User, UserRole,
};
use crate::geo::GeoPoint;
use watertruck_core::DispatchResult;

/// 用户资料更新（None表示该字段不变）
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none() && self.role.is_none()
    }
}

/// 水车资料更新（None表示该字段不变）
#[derive(Debug, Clone, Default)]
pub struct TruckPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub capacity_gallons: Option<i32>,
    pub price_fixed: Option<f64>,
    pub avg_job_minutes: Option<i32>,
    pub is_active: Option<bool>,
}

impl TruckPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.capacity_gallons.is_none()
            && self.price_fixed.is_none()
            && self.avg_job_minutes.is_none()
            && self.is_active.is_none()
    }
}

/// 可接单水车及其排队信息
#[derive(Debug, Clone, Serialize)]
pub struct TruckWithQueue {
    pub truck: Truck,
    pub queue_length: i64,
    pub operator_mode: Option<OperatorMode>,
}

/// 订单 + 双方展示字段（不含请求列表）
#[derive(Debug, Clone, Serialize)]
pub struct JobWithParties {
    pub job: Job,
    pub truck_name: Option<String>,
    pub truck_phone: Option<String>,
    pub truck_capacity_gallons: Option<i32>,
    pub customer_display_name: Option<String>,
}

/// 订单请求 + 所属水车的报价展示字段
#[derive(Debug, Clone, Serialize)]
pub struct JobRequestOffer {
    pub request: JobRequest,
    pub truck_name: Option<String>,
    pub truck_capacity_gallons: Option<i32>,
    pub truck_price_fixed: Option<f64>,
}

/// 发给水车的待处理请求 + 订单现场信息
#[derive(Debug, Clone, Serialize)]
pub struct PendingOffer {
    pub request: JobRequest,
    pub location: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub job_created_at: DateTime<Utc>,
}

/// 运营商视角的待指派订单（带发起请求的水车）
#[derive(Debug, Clone, Serialize)]
pub struct OperatorPendingJob {
    pub job: Job,
    pub requested_truck_id: i64,
    pub requested_truck_name: Option<String>,
}

/// 运营商视角的进行中订单
#[derive(Debug, Clone, Serialize)]
pub struct OperatorActiveJob {
    pub job: Job,
    pub truck_name: Option<String>,
}

/// 用户仓储抽象
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, device_token: &str) -> DispatchResult<User>;
    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<User>>;
    async fn find_by_device_token(&self, device_token: &str) -> DispatchResult<Option<User>>;
    async fn update(&self, id: i64, patch: &UserPatch) -> DispatchResult<()>;
    async fn email_in_use(&self, email: &str, exclude_user_id: i64) -> DispatchResult<bool>;
}

/// 水车仓储抽象
#[async_trait]
pub trait TruckRepository: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        operator_id: Option<i64>,
        avg_job_minutes: i32,
    ) -> DispatchResult<Truck>;
    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Truck>>;
    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Truck>>;
    async fn find_by_operator_id(&self, operator_id: i64) -> DispatchResult<Vec<Truck>>;
    async fn update(&self, id: i64, patch: &TruckPatch) -> DispatchResult<()>;
    async fn set_operator(&self, truck_id: i64, operator_id: i64) -> DispatchResult<()>;
    async fn touch_last_seen(&self, id: i64) -> DispatchResult<()>;
    async fn update_location(&self, id: i64, point: GeoPoint) -> DispatchResult<()>;

    /// 惰性离线清扫：把心跳早于cutoff的在营水车置为停用，返回受影响行数。
    /// 幂等，可以被任意次触发。
    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64>;

    /// 资料齐全、在营且心跳不早于cutoff的水车，
    /// 按(排队长度升序, 名称升序)排列
    async fn list_available(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<TruckWithQueue>>;

    async fn queue_length(&self, truck_id: i64) -> DispatchResult<i64>;

    /// 资料齐全但处于离线状态（停用或心跳早于cutoff）的水车
    async fn find_offline(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<Truck>>;
}

/// 运营商仓储抽象
#[async_trait]
pub trait OperatorRepository: Send + Sync {
    async fn create(
        &self,
        user_id: i64,
        mode: OperatorMode,
        service_area: Option<&str>,
    ) -> DispatchResult<Operator>;
    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Operator>>;
    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Operator>>;
    async fn update_mode(&self, id: i64, mode: OperatorMode) -> DispatchResult<()>;
    async fn update_service_area(&self, id: i64, service_area: &str) -> DispatchResult<()>;
    async fn truck_count(&self, id: i64) -> DispatchResult<i64>;
}

/// 订单仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 原子创建订单及对每台候选水车的pending请求（扇出）
    async fn create_with_requests(&self, new_job: &NewJob, truck_ids: &[i64])
        -> DispatchResult<Job>;

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Job>>;
    async fn find_with_parties(&self, id: i64) -> DispatchResult<Option<JobWithParties>>;

    /// 条件接单，先接先得的落点。
    ///
    /// 单个事务内执行：仅当订单仍为pending时写入truck_id/price/
    /// accepted_at并置为accepted（按受影响行数判定竞争结果）；
    /// 标记获胜请求为accepted；其余pending请求全部置为expired。
    /// 返回false表示订单已被抢走或请求已非pending，事务不产生任何效果。
    async fn try_accept(
        &self,
        job_id: i64,
        request_id: i64,
        truck_id: i64,
        price: f64,
    ) -> DispatchResult<bool>;

    /// 条件状态迁移（UPDATE ... WHERE status = from），返回是否命中。
    /// 迁移到delivered时同时写入completed_at。
    async fn transition(&self, id: i64, from: JobStatus, to: JobStatus) -> DispatchResult<bool>;

    /// 原子取消：订单置为cancelled（仅当仍可取消时），
    /// 同一工作单元内把全部pending请求置为expired。返回是否命中。
    async fn cancel_with_requests(&self, id: i64) -> DispatchResult<bool>;

    async fn find_by_customer(&self, customer_user_id: i64) -> DispatchResult<Vec<Job>>;
    async fn find_by_truck(
        &self,
        truck_id: i64,
        status: Option<JobStatus>,
    ) -> DispatchResult<Vec<Job>>;
    async fn find_pending_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorPendingJob>>;
    async fn find_active_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorActiveJob>>;
}

/// 订单请求仓储抽象
#[async_trait]
pub trait JobRequestRepository: Send + Sync {
    async fn create(&self, job_id: i64, truck_id: i64) -> DispatchResult<JobRequest>;
    async fn find_by_job_and_truck(
        &self,
        job_id: i64,
        truck_id: i64,
    ) -> DispatchResult<Option<JobRequest>>;
    async fn find_by_job(&self, job_id: i64) -> DispatchResult<Vec<JobRequestOffer>>;
    async fn find_pending_by_truck(&self, truck_id: i64) -> DispatchResult<Vec<PendingOffer>>;

    /// 条件拒单（仅当请求仍为pending），返回是否命中
    async fn mark_rejected(&self, id: i64) -> DispatchResult<bool>;

    async fn pending_count(&self, job_id: i64) -> DispatchResult<i64>;
}

/// 通知累积队列仓储抽象
#[async_trait]
pub trait NotificationQueueRepository: Send + Sync {
    /// upsert：不存在则以count=1插入，存在则count+1；同时刷新last_customer_at
    async fn increment(&self, user_id: i64) -> DispatchResult<()>;

    /// last_notified_at为空或早于cutoff的条目
    async fn due_entries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DispatchResult<Vec<NotificationQueueEntry>>;

    /// 推送成功后清零计数并盖上last_notified_at
    async fn mark_notified(&self, user_id: i64) -> DispatchResult<()>;
}

/// 推送订阅仓储抽象
#[async_trait]
pub trait PushSubscriptionRepository: Send + Sync {
    /// 每用户一条，新订阅覆盖旧订阅
    async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> DispatchResult<()>;
    async fn find_by_user(&self, user_id: i64) -> DispatchResult<Option<PushSubscription>>;
}

/// 邀请仓储抽象
#[async_trait]
pub trait InviteRepository: Send + Sync {
    async fn create(&self, operator_id: i64, token: &str) -> DispatchResult<Invite>;
    async fn find_by_token(&self, token: &str) -> DispatchResult<Option<Invite>>;

    /// 条件核销（仅当尚未使用），返回是否命中
    async fn mark_used(&self, id: i64, truck_id: i64) -> DispatchResult<bool>;
}
