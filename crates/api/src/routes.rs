use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use watertruck_core::AppConfig;
use watertruck_dispatcher::{
    IdentityService, InviteService, JobDispatchService, NotificationFanout, OperatorService,
    TruckService,
};
use watertruck_domain::PushSubscriptionRepository;

use crate::handlers::{
    config::public_config,
    health::health_check,
    identity::{get_me, update_me},
    invites::{create_invite, get_invite, redeem_invite},
    jobs::{
        accept_job, cancel_job, create_job, get_job, list_my_jobs, notify_trucks, reject_job,
        update_job_status,
    },
    operator::{
        assign_job, create_operator, get_operator, get_operator_jobs, get_operator_trucks,
        set_operator_mode,
    },
    trucks::{
        available_trucks, create_truck, get_truck, get_truck_jobs, save_subscription,
        update_truck, update_truck_location,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityService>,
    pub trucks: Arc<TruckService>,
    pub dispatch: Arc<JobDispatchService>,
    pub operators: Arc<OperatorService>,
    pub invites: Arc<InviteService>,
    pub fanout: Arc<dyn NotificationFanout>,
    pub subscriptions: Arc<dyn PushSubscriptionRepository>,
    pub config: Arc<AppConfig>,
}

/// 创建API路由
pub fn create_app(state: AppState) -> Router {
    // 除 /api/config 外的所有 /api 路由都要求设备令牌身份
    let api = Router::new()
        // 身份
        .route("/me", get(get_me).post(update_me))
        // 水车
        .route("/trucks/available", get(available_trucks))
        .route("/trucks", post(create_truck))
        .route("/trucks/{id}", get(get_truck).put(update_truck))
        .route("/trucks/{id}/jobs", get(get_truck_jobs))
        .route("/trucks/{id}/location", post(update_truck_location))
        .route("/trucks/{id}/subscribe", post(save_subscription))
        // 客户到访信号
        .route("/notify-trucks", post(notify_trucks))
        // 订单
        .route("/jobs", post(create_job).get(list_my_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/accept", post(accept_job))
        .route("/jobs/{id}/reject", post(reject_job))
        .route("/jobs/{id}/status", post(update_job_status))
        .route("/jobs/{id}/cancel", post(cancel_job))
        // 运营商
        .route("/operator", post(create_operator).get(get_operator))
        .route("/operator/mode", post(set_operator_mode))
        .route("/operator/trucks", get(get_operator_trucks))
        .route("/operator/jobs", get(get_operator_jobs))
        .route("/operator/jobs/{id}/assign", post(assign_job))
        // 邀请
        .route("/invites", post(create_invite))
        .route("/invites/{token}", get(get_invite))
        .route("/invites/{token}/redeem", post(redeem_invite))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::identity::resolve_identity,
        ))
        // 公开配置不要求身份
        .route("/config", get(public_config));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http());

    if state.config.api.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
