//! 调度核心服务层
//!
//! 订单派发状态机、可接单水车解析、通知扇出与运营商视图。
//! 所有状态变更都经由本crate的服务完成，API层只做参数提取和映射。

pub mod identity_service;
pub mod invite_service;
pub mod job_dispatch;
pub mod notification_fanout;
pub mod operator_service;
pub mod truck_service;

pub mod test_utils;

pub use identity_service::{EnrichedUser, IdentityService, ProfilePatch, TruckProfile};
pub use invite_service::{InviteDetails, InviteService, RedeemOutcome};
pub use job_dispatch::{JobDetails, JobDispatchService, TruckLocationInfo};
pub use notification_fanout::{FanoutConfig, NotificationFanout, PushNotificationFanout};
pub use operator_service::{FleetTruck, OperatorDashboard, OperatorService, OperatorWithDetails};
pub use truck_service::{AvailableTruck, TruckAvailabilityConfig, TruckService, TruckUpdate};
