use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use watertruck_api::{create_app, AppState};
use watertruck_core::AppConfig;
use watertruck_dispatcher::{
    FanoutConfig, IdentityService, InviteService, JobDispatchService, NotificationFanout,
    OperatorService, PushNotificationFanout, TruckAvailabilityConfig, TruckService,
};
use watertruck_domain::{
    InviteRepository, JobRepository, JobRequestRepository, NotificationQueueRepository,
    OperatorRepository, PushNotifier, PushSubscriptionRepository, TruckRepository, UserRepository,
};
use watertruck_infrastructure::{
    create_pool, PostgresInviteRepository, PostgresJobRepository, PostgresJobRequestRepository,
    PostgresNotificationQueueRepository, PostgresOperatorRepository,
    PostgresPushSubscriptionRepository, PostgresTruckRepository, PostgresUserRepository,
    WebPushConfig, WebPushGateway,
};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    state: AppState,
}

impl Application {
    /// 创建应用实例：连接池 -> 仓储 -> 服务 -> API状态
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = create_database_pool(&config).await?;

        // Repository实例
        let user_repo: Arc<dyn UserRepository> =
            Arc::new(PostgresUserRepository::new(pool.clone()));
        let truck_repo: Arc<dyn TruckRepository> =
            Arc::new(PostgresTruckRepository::new(pool.clone()));
        let operator_repo: Arc<dyn OperatorRepository> =
            Arc::new(PostgresOperatorRepository::new(pool.clone()));
        let job_repo: Arc<dyn JobRepository> = Arc::new(PostgresJobRepository::new(pool.clone()));
        let request_repo: Arc<dyn JobRequestRepository> =
            Arc::new(PostgresJobRequestRepository::new(pool.clone()));
        let queue_repo: Arc<dyn NotificationQueueRepository> =
            Arc::new(PostgresNotificationQueueRepository::new(pool.clone()));
        let subscription_repo: Arc<dyn PushSubscriptionRepository> =
            Arc::new(PostgresPushSubscriptionRepository::new(pool.clone()));
        let invite_repo: Arc<dyn InviteRepository> =
            Arc::new(PostgresInviteRepository::new(pool.clone()));

        // 出站推送网关（进程级单例）
        let notifier: Arc<dyn PushNotifier> = Arc::new(WebPushGateway::new(WebPushConfig {
            gateway_url: config.notifications.gateway_url.clone(),
            vapid_subject: config.notifications.vapid_subject.clone(),
            vapid_public_key: config.notifications.vapid_public_key.clone(),
            vapid_private_key: config.notifications.vapid_private_key.clone(),
        }));

        let fanout: Arc<dyn NotificationFanout> = Arc::new(PushNotificationFanout::new(
            Arc::clone(&truck_repo),
            Arc::clone(&job_repo),
            Arc::clone(&queue_repo),
            Arc::clone(&subscription_repo),
            notifier,
            FanoutConfig {
                enabled: config.notifications.enabled,
                throttle_minutes: config.notifications.throttle_minutes,
                max_distance_km: config.truck.max_distance_km,
                offline_timeout_minutes: config.truck.offline_timeout_minutes,
            },
        ));

        let dispatch = Arc::new(JobDispatchService::new(
            Arc::clone(&job_repo),
            Arc::clone(&request_repo),
            Arc::clone(&truck_repo),
            Arc::clone(&operator_repo),
            Some(Arc::clone(&fanout)),
        ));

        let trucks = Arc::new(TruckService::new(
            Arc::clone(&truck_repo),
            Arc::clone(&user_repo),
            Arc::clone(&job_repo),
            Arc::clone(&request_repo),
            TruckAvailabilityConfig {
                offline_timeout_minutes: config.truck.offline_timeout_minutes,
                max_distance_km: config.truck.max_distance_km,
                default_avg_job_minutes: config.truck.default_avg_job_minutes,
            },
        ));

        let identity = Arc::new(IdentityService::new(
            Arc::clone(&user_repo),
            Arc::clone(&truck_repo),
            Arc::clone(&operator_repo),
        ));

        let operators = Arc::new(OperatorService::new(
            Arc::clone(&operator_repo),
            Arc::clone(&user_repo),
            Arc::clone(&truck_repo),
            Arc::clone(&job_repo),
        ));

        let invites = Arc::new(InviteService::new(
            invite_repo,
            Arc::clone(&operator_repo),
            Arc::clone(&truck_repo),
            Arc::clone(&user_repo),
            config.app.url.clone(),
            config.truck.default_avg_job_minutes,
        ));

        let state = AppState {
            identity,
            trucks,
            dispatch,
            operators,
            invites,
            fanout,
            subscriptions: subscription_repo,
            config: Arc::new(config.clone()),
        };

        Ok(Self { config, state })
    }

    /// 运行API服务器直至收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = create_app(self.state.clone());

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }
}

/// 创建数据库连接池并执行迁移
async fn create_database_pool(config: &AppConfig) -> Result<PgPool> {
    let pool = create_pool(&config.database).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("运行数据库迁移失败")?;

    Ok(pool)
}
