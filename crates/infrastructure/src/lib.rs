//! 基础设施层：Postgres仓储实现与出站推送网关

pub mod database;
pub mod webpush;

pub use database::manager::create_pool;
pub use database::postgres::{
    PostgresInviteRepository, PostgresJobRepository, PostgresJobRequestRepository,
    PostgresNotificationQueueRepository, PostgresOperatorRepository,
    PostgresPushSubscriptionRepository, PostgresTruckRepository, PostgresUserRepository,
};
pub use webpush::{WebPushConfig, WebPushGateway};
