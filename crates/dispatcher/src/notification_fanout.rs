use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use watertruck_domain::{
    geo, DispatchResult, GeoPoint, JobRepository, NotificationQueueRepository, PushNotifier,
    PushPayload, PushSubscriptionRepository, TruckRepository,
};

/// 扇出参数，来自配置
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub enabled: bool,
    pub throttle_minutes: i64,
    pub max_distance_km: f64,
    pub offline_timeout_minutes: i64,
}

/// 通知扇出的服务接口
#[async_trait]
pub trait NotificationFanout: Send + Sync {
    /// 客户带定位到访：为附近离线水车累积"附近有客户"信号，
    /// 随后触发一次节流冲刷
    async fn on_customer_visit(&self, customer_location: Option<GeoPoint>) -> DispatchResult<()>;

    /// 冲刷到期的累积条目，每个接收者在节流窗口内至多一条推送
    async fn flush_due(&self) -> DispatchResult<()>;

    /// 订单进入en_route时给客户的点对点通知，尽力而为
    async fn notify_delivery_started(&self, job_id: i64) -> DispatchResult<()>;
}

/// 基于推送订阅的扇出实现
///
/// 队列和订阅都按接收用户维度记账：水车的通知经由其车主用户路由。
/// 单条推送失败只记日志并跳过，绝不中断批次、也不回传给触发请求。
pub struct PushNotificationFanout {
    truck_repo: Arc<dyn TruckRepository>,
    job_repo: Arc<dyn JobRepository>,
    queue_repo: Arc<dyn NotificationQueueRepository>,
    subscription_repo: Arc<dyn PushSubscriptionRepository>,
    notifier: Arc<dyn PushNotifier>,
    config: FanoutConfig,
}

impl PushNotificationFanout {
    pub fn new(
        truck_repo: Arc<dyn TruckRepository>,
        job_repo: Arc<dyn JobRepository>,
        queue_repo: Arc<dyn NotificationQueueRepository>,
        subscription_repo: Arc<dyn PushSubscriptionRepository>,
        notifier: Arc<dyn PushNotifier>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            truck_repo,
            job_repo,
            queue_repo,
            subscription_repo,
            notifier,
            config,
        }
    }
}

#[async_trait]
impl NotificationFanout for PushNotificationFanout {
    async fn on_customer_visit(&self, customer_location: Option<GeoPoint>) -> DispatchResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        // 没有客户定位就没有可定向的目标，不做无差别广播
        let Some(customer) = customer_location else {
            return Ok(());
        };

        let cutoff = Utc::now() - Duration::minutes(self.config.offline_timeout_minutes);
        let offline_trucks = self.truck_repo.find_offline(cutoff).await?;

        let mut queued = 0;
        for truck in offline_trucks {
            // 没有位置就无处可"附近"，这里与可接单过滤的策略相反
            let Some(truck_location) = truck.location() else {
                continue;
            };
            if geo::haversine_km(truck_location, customer) > self.config.max_distance_km {
                continue;
            }
            if self
                .subscription_repo
                .find_by_user(truck.user_id)
                .await?
                .is_none()
            {
                continue;
            }
            self.queue_repo.increment(truck.user_id).await?;
            queued += 1;
        }

        if queued > 0 {
            debug!("客户到访：为 {} 台附近离线水车累积了通知信号", queued);
        }

        self.flush_due().await
    }

    async fn flush_due(&self) -> DispatchResult<()> {
        let cutoff = Utc::now() - Duration::minutes(self.config.throttle_minutes);
        let entries = self.queue_repo.due_entries(cutoff).await?;

        for entry in entries {
            if entry.customer_count == 0 {
                continue;
            }
            let Some(subscription) = self.subscription_repo.find_by_user(entry.user_id).await?
            else {
                continue;
            };

            let payload = PushPayload::customers_nearby(entry.customer_count);
            match self.notifier.send(&subscription, &payload).await {
                Ok(()) => {
                    self.queue_repo.mark_notified(entry.user_id).await?;
                    info!(
                        "已推送附近客户通知: 用户 {}, 客户数 {}",
                        entry.user_id, entry.customer_count
                    );
                }
                Err(e) if e.is_expired_subscription() => {
                    // 订阅过期只记日志，不做自动清理
                    warn!("用户 {} 的推送订阅已过期，本次跳过", entry.user_id);
                }
                Err(e) => {
                    warn!("向用户 {} 推送失败，本次跳过: {}", entry.user_id, e);
                }
            }
        }

        Ok(())
    }

    async fn notify_delivery_started(&self, job_id: i64) -> DispatchResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(parties) = self.job_repo.find_with_parties(job_id).await? else {
            return Ok(());
        };
        let Some(subscription) = self
            .subscription_repo
            .find_by_user(parties.job.customer_user_id)
            .await?
        else {
            return Ok(());
        };

        let truck_name = parties.truck_name.as_deref().unwrap_or("Your water truck");
        let payload = PushPayload::water_collected(job_id, truck_name);

        if let Err(e) = self.notifier.send(&subscription, &payload).await {
            warn!("订单 {} 的取水通知推送失败: {}", job_id, e);
        } else {
            info!("订单 {} 的取水通知已推送给客户", job_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        builders::TruckBuilder, InMemoryStore, PushFailureMode, RecordingNotifier,
    };

    const CUSTOMER: GeoPoint = GeoPoint {
        lat: 10.65,
        lng: -61.50,
    };

    fn config() -> FanoutConfig {
        FanoutConfig {
            enabled: true,
            throttle_minutes: 15,
            max_distance_km: 50.0,
            offline_timeout_minutes: 30,
        }
    }

    fn fanout_with(
        store: &InMemoryStore,
        notifier: Arc<RecordingNotifier>,
        config: FanoutConfig,
    ) -> PushNotificationFanout {
        PushNotificationFanout::new(
            store.truck_repo(),
            store.job_repo(),
            store.queue_repo(),
            store.subscription_repo(),
            notifier,
            config,
        )
    }

    /// 离线水车：资料齐全、有定位、停用
    fn offline_truck(id: i64, user_id: i64, lat: f64, lng: f64) -> watertruck_domain::Truck {
        let mut truck = TruckBuilder::new()
            .with_id(id)
            .with_user_id(user_id)
            .with_name(&format!("truck-{id}"))
            .with_phone("555-0101")
            .with_capacity(400)
            .with_location(lat, lng)
            .build();
        truck.is_active = false;
        truck
    }

    #[tokio::test]
    async fn test_visit_queues_and_pushes_to_nearby_offline_truck() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50)); // 约1公里
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();

        // 从未通知过的条目立即到期：一条计数为1的推送
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 11);
        assert_eq!(sent[0].1.data["customer_count"], 1);
        assert_eq!(sent[0].1.data["type"], "customers_nearby");

        // 推送后计数清零并盖章
        let entry = store.get_queue_entry(11).unwrap();
        assert_eq!(entry.customer_count, 0);
        assert!(entry.last_notified_at.is_some());
    }

    #[tokio::test]
    async fn test_disabled_or_missing_location_is_noop() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50));
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::new());

        let mut disabled = config();
        disabled.enabled = false;
        let fanout = fanout_with(&store, notifier.clone(), disabled);
        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();
        assert_eq!(notifier.sent_count(), 0);
        assert!(store.get_queue_entry(11).is_none());

        let fanout = fanout_with(&store, notifier.clone(), config());
        fanout.on_customer_visit(None).await.unwrap();
        assert_eq!(notifier.sent_count(), 0);
        assert!(store.get_queue_entry(11).is_none());
    }

    #[tokio::test]
    async fn test_trucks_without_location_or_subscription_are_skipped() {
        let store = InMemoryStore::new();
        // 无定位的离线水车（有订阅）
        let mut no_gps = TruckBuilder::new()
            .with_id(1)
            .with_user_id(11)
            .with_name("no-gps")
            .with_phone("555-0101")
            .with_capacity(400)
            .build();
        no_gps.is_active = false;
        store.insert_truck(no_gps);
        store.insert_subscription(11, "https://push.example/a");
        // 有定位但无订阅
        store.insert_truck(offline_truck(2, 12, 10.66, -61.50));
        // 超出服务距离（约116公里）
        store.insert_truck(offline_truck(3, 13, 11.70, -61.50));
        store.insert_subscription(13, "https://push.example/c");

        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());
        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();

        assert_eq!(notifier.sent_count(), 0);
        assert!(store.get_queue_entry(11).is_none());
        assert!(store.get_queue_entry(12).is_none());
        assert!(store.get_queue_entry(13).is_none());
    }

    #[tokio::test]
    async fn test_throttle_batches_visits_into_one_push() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50));
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        // 节流窗口尚未过去（5分钟前刚通知过）
        store.set_last_notified(11, Some(Utc::now() - Duration::minutes(5)));

        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();
        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();
        assert_eq!(notifier.sent_count(), 0);
        assert_eq!(store.get_queue_entry(11).unwrap().customer_count, 2);

        // 窗口过去后的下一次冲刷：两次到访合并为一条计数2的推送
        store.set_last_notified(11, Some(Utc::now() - Duration::minutes(16)));
        fanout.flush_due().await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.data["customer_count"], 2);
        assert_eq!(store.get_queue_entry(11).unwrap().customer_count, 0);
    }

    #[tokio::test]
    async fn test_visits_spanning_window_produce_two_single_pushes() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50));
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();
        // 模拟节流窗口流逝
        store.set_last_notified(11, Some(Utc::now() - Duration::minutes(16)));
        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.data["customer_count"], 1);
        assert_eq!(sent[1].1.data["customer_count"], 1);
    }

    #[tokio::test]
    async fn test_zero_count_entries_are_skipped() {
        let store = InMemoryStore::new();
        store.insert_subscription(11, "https://push.example/a");
        // 到期但计数为0的条目
        store.set_last_notified(11, Some(Utc::now() - Duration::minutes(20)));
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        fanout.flush_due().await.unwrap();
        assert_eq!(notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_swallowed_and_entry_kept() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50));
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::with_failure(PushFailureMode::Transport));
        let fanout = fanout_with(&store, notifier.clone(), config());

        // 发送失败不向调用方传播
        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();

        // 未盖章，计数保留，下个窗口还能再试
        let entry = store.get_queue_entry(11).unwrap();
        assert_eq!(entry.customer_count, 1);
        assert!(entry.last_notified_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_subscription_is_logged_and_kept() {
        let store = InMemoryStore::new();
        store.insert_truck(offline_truck(1, 11, 10.66, -61.50));
        store.insert_subscription(11, "https://push.example/a");
        let notifier = Arc::new(RecordingNotifier::with_failure(
            PushFailureMode::ExpiredSubscription,
        ));
        let fanout = fanout_with(&store, notifier.clone(), config());

        fanout.on_customer_visit(Some(CUSTOMER)).await.unwrap();

        // 订阅保留（不自动删除），批次不中断
        let sub = store.subscription_repo().find_by_user(11).await.unwrap();
        assert!(sub.is_some());
    }

    #[tokio::test]
    async fn test_delivery_started_pushes_to_customer() {
        let store = InMemoryStore::new();
        store.insert_truck(
            TruckBuilder::new()
                .with_id(10)
                .with_user_id(110)
                .with_name("Blue Tank")
                .with_price(45.0)
                .active()
                .build(),
        );
        store.insert_subscription(1, "https://push.example/customer");
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        let job = store
            .job_repo()
            .create_with_requests(
                &watertruck_domain::NewJob {
                    customer_user_id: 1,
                    location: "123 Main St".to_string(),
                    customer_name: None,
                    customer_phone: None,
                    lat: None,
                    lng: None,
                },
                &[10],
            )
            .await
            .unwrap();
        let request = store
            .request_repo()
            .find_by_job_and_truck(job.id, 10)
            .await
            .unwrap()
            .unwrap();
        store
            .job_repo()
            .try_accept(job.id, request.id, 10, 45.0)
            .await
            .unwrap();

        fanout.notify_delivery_started(job.id).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[0].1.data["type"], "water_collected");
        assert_eq!(sent[0].1.data["job_id"], job.id);
        assert!(sent[0].1.body.contains("Blue Tank"));
    }

    #[tokio::test]
    async fn test_delivery_started_noop_when_missing_pieces() {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let fanout = fanout_with(&store, notifier.clone(), config());

        // 订单不存在
        fanout.notify_delivery_started(999).await.unwrap();
        assert_eq!(notifier.sent_count(), 0);

        // 通知关闭
        let mut disabled = config();
        disabled.enabled = false;
        let fanout = fanout_with(&store, notifier.clone(), disabled);
        fanout.notify_delivery_started(999).await.unwrap();
        assert_eq!(notifier.sent_count(), 0);
    }
}
