//! 测试支撑：内存仓储实现与实体构造器
//!
//! 单测不依赖数据库连接；内存实现用同一把锁模拟仓储层的
//! 原子工作单元，竞争语义与真实实现保持一致。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use watertruck_domain::{
    DispatchResult, GeoPoint, Invite, InviteRepository, Job, JobRepository, JobRequest,
    JobRequestOffer, JobRequestRepository, JobRequestStatus, JobStatus, JobWithParties, NewJob,
    NotificationQueueEntry, NotificationQueueRepository, Operator, OperatorActiveJob,
    OperatorMode, OperatorPendingJob, OperatorRepository, PendingOffer, PushError, PushNotifier,
    PushPayload, PushSubscription, PushSubscriptionRepository, Truck, TruckPatch, TruckRepository,
    TruckWithQueue, User, UserPatch, UserRepository,
};

use crate::notification_fanout::NotificationFanout;

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    trucks: HashMap<i64, Truck>,
    operators: HashMap<i64, Operator>,
    jobs: HashMap<i64, Job>,
    requests: HashMap<i64, JobRequest>,
    queue: HashMap<i64, NotificationQueueEntry>,
    subscriptions: HashMap<i64, PushSubscription>,
    invites: HashMap<i64, Invite>,
    next_user_id: i64,
    next_truck_id: i64,
    next_operator_id: i64,
    next_job_id: i64,
    next_request_id: i64,
    next_invite_id: i64,
}

impl Inner {
    fn queue_length_of(&self, truck_id: i64) -> i64 {
        self.jobs
            .values()
            .filter(|j| j.truck_id == Some(truck_id) && j.status.counts_toward_queue())
            .count() as i64
    }
}

/// 全体仓储共用的内存存储
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_user_id: 1,
                next_truck_id: 1,
                next_operator_id: 1,
                next_job_id: 1,
                next_request_id: 1,
                next_invite_id: 1,
                ..Inner::default()
            })),
        }
    }

    pub fn user_repo(&self) -> Arc<dyn UserRepository> {
        Arc::new(InMemoryUserRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn truck_repo(&self) -> Arc<dyn TruckRepository> {
        Arc::new(InMemoryTruckRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn operator_repo(&self) -> Arc<dyn OperatorRepository> {
        Arc::new(InMemoryOperatorRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn job_repo(&self) -> Arc<dyn JobRepository> {
        Arc::new(InMemoryJobRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn request_repo(&self) -> Arc<dyn JobRequestRepository> {
        Arc::new(InMemoryJobRequestRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn queue_repo(&self) -> Arc<dyn NotificationQueueRepository> {
        Arc::new(InMemoryNotificationQueueRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn subscription_repo(&self) -> Arc<dyn PushSubscriptionRepository> {
        Arc::new(InMemoryPushSubscriptionRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn invite_repo(&self) -> Arc<dyn InviteRepository> {
        Arc::new(InMemoryInviteRepository {
            inner: Arc::clone(&self.inner),
        })
    }

    /// 以给定id插入用户，返回id
    pub fn insert_user(&self, user: User) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = user.id;
        inner.next_user_id = inner.next_user_id.max(id + 1);
        inner.users.insert(id, user);
        id
    }

    /// 以给定id插入水车，返回id
    pub fn insert_truck(&self, truck: Truck) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = truck.id;
        inner.next_truck_id = inner.next_truck_id.max(id + 1);
        inner.trucks.insert(id, truck);
        id
    }

    /// 插入运营商记录，返回生成的id
    pub fn insert_operator(&self, user_id: i64, mode: OperatorMode) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_operator_id;
        inner.next_operator_id += 1;
        let now = Utc::now();
        inner.operators.insert(
            id,
            Operator {
                id,
                user_id,
                mode,
                service_area: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn insert_subscription(&self, user_id: i64, endpoint: &str) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.subscriptions.insert(
            user_id,
            PushSubscription {
                user_id,
                endpoint: endpoint.to_string(),
                p256dh: "p256dh-key".to_string(),
                auth: "auth-key".to_string(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn get_truck(&self, id: i64) -> Option<Truck> {
        self.inner.lock().unwrap().trucks.get(&id).cloned()
    }

    pub fn get_queue_entry(&self, user_id: i64) -> Option<NotificationQueueEntry> {
        self.inner.lock().unwrap().queue.get(&user_id).cloned()
    }

    /// 把某接收者的last_notified_at改写到指定时刻，用于模拟时间流逝
    pub fn set_last_notified(&self, user_id: i64, at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .queue
            .entry(user_id)
            .or_insert_with(|| NotificationQueueEntry {
                user_id,
                customer_count: 0,
                last_customer_at: None,
                last_notified_at: None,
            });
        entry.last_notified_at = at;
    }

    pub fn get_invite(&self, id: i64) -> Option<Invite> {
        self.inner.lock().unwrap().invites.get(&id).cloned()
    }

    /// 直接塞入一条指定状态的订单（用于排队长度等测试铺数据）
    pub fn insert_job_for_truck(&self, truck_id: i64, status: JobStatus) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_job_id;
        inner.next_job_id += 1;
        inner.jobs.insert(
            id,
            Job {
                id,
                customer_user_id: 1,
                truck_id: Some(truck_id),
                status,
                price: Some(45.0),
                location: "seeded".to_string(),
                customer_name: None,
                customer_phone: None,
                lat: None,
                lng: None,
                created_at: Utc::now(),
                accepted_at: Some(Utc::now()),
                completed_at: None,
            },
        );
        id
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryUserRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, device_token: &str) -> DispatchResult<User> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let mut user = User::new(device_token.to_string());
        user.id = id;
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_by_device_token(&self, device_token: &str) -> DispatchResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.device_token == device_token)
            .cloned())
    }

    async fn update(&self, id: i64, patch: &UserPatch) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(&id) {
            if let Some(name) = &patch.name {
                user.name = Some(name.clone());
            }
            if let Some(phone) = &patch.phone {
                user.phone = Some(phone.clone());
            }
            if let Some(email) = &patch.email {
                user.email = Some(email.clone());
            }
            if let Some(role) = patch.role {
                user.role = role;
            }
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn email_in_use(&self, email: &str, exclude_user_id: i64) -> DispatchResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .any(|u| u.id != exclude_user_id && u.email.as_deref() == Some(email)))
    }
}

struct InMemoryTruckRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl TruckRepository for InMemoryTruckRepository {
    async fn create(
        &self,
        user_id: i64,
        operator_id: Option<i64>,
        avg_job_minutes: i32,
    ) -> DispatchResult<Truck> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_truck_id;
        inner.next_truck_id += 1;
        let mut truck = Truck::new(user_id, operator_id, avg_job_minutes);
        truck.id = id;
        inner.trucks.insert(id, truck.clone());
        Ok(truck)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Truck>> {
        Ok(self.inner.lock().unwrap().trucks.get(&id).cloned())
    }

    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Truck>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .trucks
            .values()
            .find(|t| t.user_id == user_id)
            .cloned())
    }

    async fn find_by_operator_id(&self, operator_id: i64) -> DispatchResult<Vec<Truck>> {
        let inner = self.inner.lock().unwrap();
        let mut trucks: Vec<Truck> = inner
            .trucks
            .values()
            .filter(|t| t.operator_id == Some(operator_id))
            .cloned()
            .collect();
        trucks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(trucks)
    }

    async fn update(&self, id: i64, patch: &TruckPatch) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(truck) = inner.trucks.get_mut(&id) {
            if let Some(name) = &patch.name {
                truck.name = Some(name.clone());
            }
            if let Some(phone) = &patch.phone {
                truck.phone = Some(phone.clone());
            }
            if let Some(capacity) = patch.capacity_gallons {
                truck.capacity_gallons = Some(capacity);
            }
            if let Some(price) = patch.price_fixed {
                truck.price_fixed = Some(price);
            }
            if let Some(avg) = patch.avg_job_minutes {
                truck.avg_job_minutes = avg;
            }
            if let Some(active) = patch.is_active {
                truck.is_active = active;
            }
            truck.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_operator(&self, truck_id: i64, operator_id: i64) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(truck) = inner.trucks.get_mut(&truck_id) {
            truck.operator_id = Some(operator_id);
        }
        Ok(())
    }

    async fn touch_last_seen(&self, id: i64) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(truck) = inner.trucks.get_mut(&id) {
            truck.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_location(&self, id: i64, point: GeoPoint) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(truck) = inner.trucks.get_mut(&id) {
            let now = Utc::now();
            truck.current_lat = Some(point.lat);
            truck.current_lng = Some(point.lng);
            truck.location_updated_at = Some(now);
            truck.last_seen_at = Some(now);
        }
        Ok(())
    }

    async fn deactivate_stale(&self, cutoff: DateTime<Utc>) -> DispatchResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for truck in inner.trucks.values_mut() {
            if truck.is_active && truck.last_seen_at.map_or(false, |seen| seen < cutoff) {
                truck.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_available(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<TruckWithQueue>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<TruckWithQueue> = inner
            .trucks
            .values()
            .filter(|t| {
                t.is_active
                    && t.name.is_some()
                    && t.phone.is_some()
                    && t.capacity_gallons.is_some()
                    && t.last_seen_at.map_or(false, |seen| seen >= cutoff)
            })
            .map(|t| TruckWithQueue {
                truck: t.clone(),
                queue_length: inner.queue_length_of(t.id),
                operator_mode: t
                    .operator_id
                    .and_then(|op| inner.operators.get(&op))
                    .map(|op| op.mode),
            })
            .collect();
        rows.sort_by(|a, b| {
            a.queue_length
                .cmp(&b.queue_length)
                .then_with(|| a.truck.name.cmp(&b.truck.name))
        });
        Ok(rows)
    }

    async fn queue_length(&self, truck_id: i64) -> DispatchResult<i64> {
        Ok(self.inner.lock().unwrap().queue_length_of(truck_id))
    }

    async fn find_offline(&self, cutoff: DateTime<Utc>) -> DispatchResult<Vec<Truck>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trucks
            .values()
            .filter(|t| {
                t.name.is_some()
                    && t.phone.is_some()
                    && t.capacity_gallons.is_some()
                    && (!t.is_active || t.last_seen_at.map_or(true, |seen| seen < cutoff))
            })
            .cloned()
            .collect())
    }
}

struct InMemoryOperatorRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl OperatorRepository for InMemoryOperatorRepository {
    async fn create(
        &self,
        user_id: i64,
        mode: OperatorMode,
        service_area: Option<&str>,
    ) -> DispatchResult<Operator> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_operator_id;
        inner.next_operator_id += 1;
        let now = Utc::now();
        let operator = Operator {
            id,
            user_id,
            mode,
            service_area: service_area.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        inner.operators.insert(id, operator.clone());
        Ok(operator)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Operator>> {
        Ok(self.inner.lock().unwrap().operators.get(&id).cloned())
    }

    async fn find_by_user_id(&self, user_id: i64) -> DispatchResult<Option<Operator>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .operators
            .values()
            .find(|o| o.user_id == user_id)
            .cloned())
    }

    async fn update_mode(&self, id: i64, mode: OperatorMode) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(operator) = inner.operators.get_mut(&id) {
            operator.mode = mode;
            operator.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_service_area(&self, id: i64, service_area: &str) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(operator) = inner.operators.get_mut(&id) {
            operator.service_area = Some(service_area.to_string());
            operator.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn truck_count(&self, id: i64) -> DispatchResult<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .trucks
            .values()
            .filter(|t| t.operator_id == Some(id))
            .count() as i64)
    }
}

struct InMemoryJobRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_with_requests(
        &self,
        new_job: &NewJob,
        truck_ids: &[i64],
    ) -> DispatchResult<Job> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_job_id;
        inner.next_job_id += 1;
        let job = Job {
            id,
            customer_user_id: new_job.customer_user_id,
            truck_id: None,
            status: JobStatus::Pending,
            price: None,
            location: new_job.location.clone(),
            customer_name: new_job.customer_name.clone(),
            customer_phone: new_job.customer_phone.clone(),
            lat: new_job.lat,
            lng: new_job.lng,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
        };
        inner.jobs.insert(id, job.clone());
        for &truck_id in truck_ids {
            let request_id = inner.next_request_id;
            inner.next_request_id += 1;
            inner.requests.insert(
                request_id,
                JobRequest {
                    id: request_id,
                    job_id: id,
                    truck_id,
                    status: JobRequestStatus::Pending,
                    created_at: Utc::now(),
                },
            );
        }
        Ok(job)
    }

    async fn find_by_id(&self, id: i64) -> DispatchResult<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn find_with_parties(&self, id: i64) -> DispatchResult<Option<JobWithParties>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.get(&id).map(|job| {
            let truck = job.truck_id.and_then(|tid| inner.trucks.get(&tid));
            JobWithParties {
                job: job.clone(),
                truck_name: truck.and_then(|t| t.name.clone()),
                truck_phone: truck.and_then(|t| t.phone.clone()),
                truck_capacity_gallons: truck.and_then(|t| t.capacity_gallons),
                customer_display_name: inner
                    .users
                    .get(&job.customer_user_id)
                    .and_then(|u| u.name.clone()),
            }
        }))
    }

    async fn try_accept(
        &self,
        job_id: i64,
        request_id: i64,
        truck_id: i64,
        price: f64,
    ) -> DispatchResult<bool> {
        // 一把锁等价于一个事务：检查与全部写入不可分割
        let mut inner = self.inner.lock().unwrap();

        match inner.jobs.get(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {}
            _ => return Ok(false),
        }
        match inner.requests.get(&request_id) {
            Some(req) if req.status == JobRequestStatus::Pending => {}
            _ => return Ok(false),
        }

        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Accepted;
            job.truck_id = Some(truck_id);
            job.price = Some(price);
            job.accepted_at = Some(Utc::now());
        }
        if let Some(req) = inner.requests.get_mut(&request_id) {
            req.status = JobRequestStatus::Accepted;
        }
        for req in inner.requests.values_mut() {
            if req.job_id == job_id
                && req.id != request_id
                && req.status == JobRequestStatus::Pending
            {
                req.status = JobRequestStatus::Expired;
            }
        }
        Ok(true)
    }

    async fn transition(&self, id: i64, from: JobStatus, to: JobStatus) -> DispatchResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                job.status = to;
                if to == JobStatus::Delivered {
                    job.completed_at = Some(Utc::now());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_with_requests(&self, id: i64) -> DispatchResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status.is_customer_cancellable() => {
                job.status = JobStatus::Cancelled;
            }
            _ => return Ok(false),
        }
        for req in inner.requests.values_mut() {
            if req.job_id == id && req.status == JobRequestStatus::Pending {
                req.status = JobRequestStatus::Expired;
            }
        }
        Ok(true)
    }

    async fn find_by_customer(&self, customer_user_id: i64) -> DispatchResult<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.customer_user_id == customer_user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_by_truck(
        &self,
        truck_id: i64,
        status: Option<JobStatus>,
    ) -> DispatchResult<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.truck_id == Some(truck_id))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_pending_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorPendingJob>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = Vec::new();
        for req in inner.requests.values() {
            if req.status != JobRequestStatus::Pending {
                continue;
            }
            let Some(truck) = inner.trucks.get(&req.truck_id) else {
                continue;
            };
            if truck.operator_id != Some(operator_id) {
                continue;
            }
            let Some(job) = inner.jobs.get(&req.job_id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            rows.push(OperatorPendingJob {
                job: job.clone(),
                requested_truck_id: truck.id,
                requested_truck_name: truck.name.clone(),
            });
        }
        rows.sort_by(|a, b| a.job.created_at.cmp(&b.job.created_at));
        Ok(rows)
    }

    async fn find_active_by_operator(
        &self,
        operator_id: i64,
    ) -> DispatchResult<Vec<OperatorActiveJob>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = Vec::new();
        for job in inner.jobs.values() {
            if !job.status.counts_toward_queue() {
                continue;
            }
            let Some(truck) = job.truck_id.and_then(|tid| inner.trucks.get(&tid)) else {
                continue;
            };
            if truck.operator_id != Some(operator_id) {
                continue;
            }
            rows.push(OperatorActiveJob {
                job: job.clone(),
                truck_name: truck.name.clone(),
            });
        }
        rows.sort_by(|a, b| b.job.accepted_at.cmp(&a.job.accepted_at));
        Ok(rows)
    }
}

struct InMemoryJobRequestRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl JobRequestRepository for InMemoryJobRequestRepository {
    async fn create(&self, job_id: i64, truck_id: i64) -> DispatchResult<JobRequest> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_request_id;
        inner.next_request_id += 1;
        let request = JobRequest {
            id,
            job_id,
            truck_id,
            status: JobRequestStatus::Pending,
            created_at: Utc::now(),
        };
        inner.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn find_by_job_and_truck(
        &self,
        job_id: i64,
        truck_id: i64,
    ) -> DispatchResult<Option<JobRequest>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .requests
            .values()
            .find(|r| r.job_id == job_id && r.truck_id == truck_id)
            .cloned())
    }

    async fn find_by_job(&self, job_id: i64) -> DispatchResult<Vec<JobRequestOffer>> {
        let inner = self.inner.lock().unwrap();
        let mut offers: Vec<JobRequestOffer> = inner
            .requests
            .values()
            .filter(|r| r.job_id == job_id)
            .map(|r| {
                let truck = inner.trucks.get(&r.truck_id);
                JobRequestOffer {
                    request: r.clone(),
                    truck_name: truck.and_then(|t| t.name.clone()),
                    truck_capacity_gallons: truck.and_then(|t| t.capacity_gallons),
                    truck_price_fixed: truck.and_then(|t| t.price_fixed),
                }
            })
            .collect();
        offers.sort_by(|a, b| a.request.created_at.cmp(&b.request.created_at));
        Ok(offers)
    }

    async fn find_pending_by_truck(&self, truck_id: i64) -> DispatchResult<Vec<PendingOffer>> {
        let inner = self.inner.lock().unwrap();
        let mut offers = Vec::new();
        for req in inner.requests.values() {
            if req.truck_id != truck_id || req.status != JobRequestStatus::Pending {
                continue;
            }
            let Some(job) = inner.jobs.get(&req.job_id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            offers.push(PendingOffer {
                request: req.clone(),
                location: job.location.clone(),
                customer_name: job.customer_name.clone(),
                customer_phone: job.customer_phone.clone(),
                lat: job.lat,
                lng: job.lng,
                job_created_at: job.created_at,
            });
        }
        offers.sort_by(|a, b| a.request.created_at.cmp(&b.request.created_at));
        Ok(offers)
    }

    async fn mark_rejected(&self, id: i64) -> DispatchResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.requests.get_mut(&id) {
            Some(req) if req.status == JobRequestStatus::Pending => {
                req.status = JobRequestStatus::Rejected;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_count(&self, job_id: i64) -> DispatchResult<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .requests
            .values()
            .filter(|r| r.job_id == job_id && r.status == JobRequestStatus::Pending)
            .count() as i64)
    }
}

struct InMemoryNotificationQueueRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl NotificationQueueRepository for InMemoryNotificationQueueRepository {
    async fn increment(&self, user_id: i64) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .queue
            .entry(user_id)
            .or_insert_with(|| NotificationQueueEntry {
                user_id,
                customer_count: 0,
                last_customer_at: None,
                last_notified_at: None,
            });
        entry.customer_count += 1;
        entry.last_customer_at = Some(Utc::now());
        Ok(())
    }

    async fn due_entries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DispatchResult<Vec<NotificationQueueEntry>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .queue
            .values()
            .filter(|e| e.last_notified_at.map_or(true, |t| t <= cutoff))
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, user_id: i64) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.queue.get_mut(&user_id) {
            entry.customer_count = 0;
            entry.last_notified_at = Some(Utc::now());
        }
        Ok(())
    }
}

struct InMemoryPushSubscriptionRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl PushSubscriptionRepository for InMemoryPushSubscriptionRepository {
    async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> DispatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let created_at = inner
            .subscriptions
            .get(&user_id)
            .map(|s| s.created_at)
            .unwrap_or(now);
        inner.subscriptions.insert(
            user_id,
            PushSubscription {
                user_id,
                endpoint: endpoint.to_string(),
                p256dh: p256dh.to_string(),
                auth: auth.to_string(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn find_by_user(&self, user_id: i64) -> DispatchResult<Option<PushSubscription>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .get(&user_id)
            .cloned())
    }
}

struct InMemoryInviteRepository {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl InviteRepository for InMemoryInviteRepository {
    async fn create(&self, operator_id: i64, token: &str) -> DispatchResult<Invite> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_invite_id;
        inner.next_invite_id += 1;
        let invite = Invite {
            id,
            operator_id,
            token: token.to_string(),
            used: false,
            truck_id: None,
            created_at: Utc::now(),
            used_at: None,
        };
        inner.invites.insert(id, invite.clone());
        Ok(invite)
    }

    async fn find_by_token(&self, token: &str) -> DispatchResult<Option<Invite>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .invites
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn mark_used(&self, id: i64, truck_id: i64) -> DispatchResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.invites.get_mut(&id) {
            Some(invite) if !invite.used => {
                invite.used = true;
                invite.truck_id = Some(truck_id);
                invite.used_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// 什么都不做的扇出桩
pub struct NullFanout;

#[async_trait]
impl NotificationFanout for NullFanout {
    async fn on_customer_visit(&self, _customer_location: Option<GeoPoint>) -> DispatchResult<()> {
        Ok(())
    }

    async fn flush_due(&self) -> DispatchResult<()> {
        Ok(())
    }

    async fn notify_delivery_started(&self, _job_id: i64) -> DispatchResult<()> {
        Ok(())
    }
}

/// 记录调用的扇出桩，可配置为总是失败
pub struct RecordingFanout {
    started: Mutex<Vec<i64>>,
    fail: bool,
}

impl RecordingFanout {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn delivery_started_jobs(&self) -> Vec<i64> {
        self.started.lock().unwrap().clone()
    }
}

impl Default for RecordingFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationFanout for RecordingFanout {
    async fn on_customer_visit(&self, _customer_location: Option<GeoPoint>) -> DispatchResult<()> {
        Ok(())
    }

    async fn flush_due(&self) -> DispatchResult<()> {
        Ok(())
    }

    async fn notify_delivery_started(&self, job_id: i64) -> DispatchResult<()> {
        if self.fail {
            return Err(watertruck_core::DispatchError::Notification(
                "模拟推送故障".to_string(),
            ));
        }
        self.started.lock().unwrap().push(job_id);
        Ok(())
    }
}

/// 推送失败模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailureMode {
    None,
    Transport,
    ExpiredSubscription,
}

/// 记录发送载荷的推送桩
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, PushPayload)>>,
    failure: PushFailureMode,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: PushFailureMode::None,
        }
    }

    pub fn with_failure(failure: PushFailureMode) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure,
        }
    }

    /// (接收用户id, 载荷)列表
    pub fn sent(&self) -> Vec<(i64, PushPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        match self.failure {
            PushFailureMode::Transport => Err(PushError::Transport("模拟网络故障".to_string())),
            PushFailureMode::ExpiredSubscription => Err(PushError::ExpiredSubscription),
            PushFailureMode::None => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((subscription.user_id, payload.clone()));
                Ok(())
            }
        }
    }
}

/// 实体构造器
pub mod builders {
    use super::*;

    pub struct TruckBuilder {
        truck: Truck,
    }

    impl TruckBuilder {
        pub fn new() -> Self {
            let mut truck = Truck::new(1, None, 30);
            truck.id = 1;
            truck.last_seen_at = Some(Utc::now());
            Self { truck }
        }

        pub fn with_id(mut self, id: i64) -> Self {
            self.truck.id = id;
            self
        }

        pub fn with_user_id(mut self, user_id: i64) -> Self {
            self.truck.user_id = user_id;
            self
        }

        pub fn with_name(mut self, name: &str) -> Self {
            self.truck.name = Some(name.to_string());
            self
        }

        pub fn with_phone(mut self, phone: &str) -> Self {
            self.truck.phone = Some(phone.to_string());
            self
        }

        pub fn with_capacity(mut self, capacity_gallons: i32) -> Self {
            self.truck.capacity_gallons = Some(capacity_gallons);
            self
        }

        pub fn with_price(mut self, price: f64) -> Self {
            self.truck.price_fixed = Some(price);
            self
        }

        pub fn with_avg_minutes(mut self, minutes: i32) -> Self {
            self.truck.avg_job_minutes = minutes;
            self
        }

        pub fn with_operator(mut self, operator_id: i64) -> Self {
            self.truck.operator_id = Some(operator_id);
            self
        }

        pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
            self.truck.current_lat = Some(lat);
            self.truck.current_lng = Some(lng);
            self.truck.location_updated_at = Some(Utc::now());
            self
        }

        pub fn with_last_seen(mut self, at: Option<DateTime<Utc>>) -> Self {
            self.truck.last_seen_at = at;
            self
        }

        /// 补全资料并激活（名称缺省时给个占位名）
        pub fn active(mut self) -> Self {
            self.truck.is_active = true;
            if self.truck.phone.is_none() {
                self.truck.phone = Some("555-0000".to_string());
            }
            if self.truck.capacity_gallons.is_none() {
                self.truck.capacity_gallons = Some(400);
            }
            self
        }

        pub fn build(self) -> Truck {
            self.truck
        }
    }

    impl Default for TruckBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct UserBuilder {
        user: User,
    }

    impl UserBuilder {
        pub fn new() -> Self {
            let mut user = User::new("device-token-1".to_string());
            user.id = 1;
            Self { user }
        }

        pub fn with_id(mut self, id: i64) -> Self {
            self.user.id = id;
            self
        }

        pub fn with_device_token(mut self, token: &str) -> Self {
            self.user.device_token = token.to_string();
            self
        }

        pub fn with_name(mut self, name: &str) -> Self {
            self.user.name = Some(name.to_string());
            self
        }

        pub fn with_email(mut self, email: &str) -> Self {
            self.user.email = Some(email.to_string());
            self
        }

        pub fn build(self) -> User {
            self.user
        }
    }

    impl Default for UserBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
