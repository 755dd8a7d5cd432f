//! # WaterTruck API
//!
//! 按需送水调度系统的REST API服务模块，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 身份
//! - `GET /api/me` - 当前用户（按设备令牌解析，首次见到即建档）
//! - `POST /api/me` - 更新资料
//!
//! ### 水车
//! - `GET /api/trucks/available` - 可接单水车列表（可带lat/lng过滤）
//! - `POST /api/trucks` - 自助注册水车
//! - `GET /api/trucks/{id}` - 水车详情（带排队信息）
//! - `PUT /api/trucks/{id}` - 更新资料/激活
//! - `GET /api/trucks/{id}/jobs` - 水车工作台（兼作心跳）
//! - `POST /api/trucks/{id}/location` - 上报GPS
//! - `POST /api/trucks/{id}/subscribe` - 保存推送订阅
//!
//! ### 订单
//! - `POST /api/jobs` - 创建订单（向多台候选水车扇出）
//! - `GET /api/jobs/{id}` - 订单详情
//! - `POST /api/jobs/{id}/accept` / `reject` / `status` / `cancel`
//!
//! ### 运营商
//! - `POST /api/operator` / `GET /api/operator`
//! - `POST /api/operator/mode`
//! - `GET /api/operator/trucks` / `GET /api/operator/jobs`
//! - `POST /api/operator/jobs/{id}/assign` - dispatcher模式手动指派
//!
//! ### 邀请
//! - `POST /api/invites` / `GET /api/invites/{token}` / `POST /api/invites/{token}/redeem`
//!
//! ### 其他
//! - `GET /health`；`GET /api/config`（免认证）
//! - `POST /api/notify-trucks` - 客户到访信号，触发离线水车通知扇出

pub mod error;
pub mod handlers;
pub mod identity;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_app, AppState};
