mod postgres_invite_repository;
mod postgres_job_repository;
mod postgres_job_request_repository;
mod postgres_notification_queue_repository;
mod postgres_operator_repository;
mod postgres_push_subscription_repository;
mod postgres_truck_repository;
mod postgres_user_repository;

pub use postgres_invite_repository::PostgresInviteRepository;
pub use postgres_job_repository::PostgresJobRepository;
pub use postgres_job_request_repository::PostgresJobRequestRepository;
pub use postgres_notification_queue_repository::PostgresNotificationQueueRepository;
pub use postgres_operator_repository::PostgresOperatorRepository;
pub use postgres_push_subscription_repository::PostgresPushSubscriptionRepository;
pub use postgres_truck_repository::PostgresTruckRepository;
pub use postgres_user_repository::PostgresUserRepository;
