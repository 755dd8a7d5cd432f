use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// 用户角色标记
///
/// 仅作为提示性标记，不构成类型层级：一个用户可以同时拥有
/// 水车记录和运营商记录，角色字段不做互斥约束。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "customer")]
    Customer,
    #[serde(rename = "truck")]
    Truck,
    #[serde(rename = "operator")]
    Operator,
    #[serde(rename = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Truck => "truck",
            UserRole::Operator => "operator",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(UserRole::Customer),
            "truck" => Some(UserRole::Truck),
            "operator" => Some(UserRole::Operator),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for UserRole {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for UserRole {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        UserRole::parse(s).ok_or_else(|| format!("Invalid user role: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for UserRole {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 用户：以设备令牌为锚的身份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub device_token: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(device_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            device_token,
            name: None,
            phone: None,
            email: None,
            role: UserRole::Customer,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 水车：与用户一对一绑定的运力记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Truck {
    pub id: i64,
    pub user_id: i64,
    pub operator_id: Option<i64>,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// 容量（加仑）
    pub capacity_gallons: Option<i32>,
    /// 固定报价，接单时锁定到订单
    pub price_fixed: Option<f64>,
    /// 平均单趟耗时（分钟），用于排队ETA估算
    pub avg_job_minutes: i32,
    pub is_active: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Truck {
    pub fn new(user_id: i64, operator_id: Option<i64>, avg_job_minutes: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            user_id,
            operator_id,
            name: None,
            phone: None,
            capacity_gallons: None,
            price_fixed: None,
            avg_job_minutes,
            is_active: false,
            last_seen_at: None,
            current_lat: None,
            current_lng: None,
            location_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 当前GPS位置（两个坐标都存在时才有效）
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.current_lat, self.current_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }

    /// 心跳是否已超过离线判定时刻
    pub fn is_offline(&self, cutoff: DateTime<Utc>) -> bool {
        !self.is_active || self.last_seen_at.map_or(true, |seen| seen < cutoff)
    }
}

/// 运营商工作模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperatorMode {
    /// 车队内水车各自抢单
    #[serde(rename = "delegated")]
    Delegated,
    /// 运营商手动指派订单
    #[serde(rename = "dispatcher")]
    Dispatcher,
}

impl OperatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorMode::Delegated => "delegated",
            OperatorMode::Dispatcher => "dispatcher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delegated" => Some(OperatorMode::Delegated),
            "dispatcher" => Some(OperatorMode::Dispatcher),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for OperatorMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OperatorMode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        OperatorMode::parse(s).ok_or_else(|| format!("Invalid operator mode: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for OperatorMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 运营商：与用户一对一绑定，管理零或多台水车
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub user_id: i64,
    pub mode: OperatorMode,
    pub service_area: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operator {
    pub fn is_dispatcher(&self) -> bool {
        matches!(self.mode, OperatorMode::Dispatcher)
    }
}

/// 订单状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "en_route")]
    EnRoute,
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "expired")]
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Accepted => "accepted",
            JobStatus::EnRoute => "en_route",
            JobStatus::Delivered => "delivered",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "accepted" => Some(JobStatus::Accepted),
            "en_route" => Some(JobStatus::EnRoute),
            "delivered" => Some(JobStatus::Delivered),
            "cancelled" => Some(JobStatus::Cancelled),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    /// 状态迁移表
    ///
    /// pending -> accepted | expired | cancelled
    /// accepted -> en_route | cancelled
    /// en_route -> delivered | cancelled
    /// delivered / cancelled / expired 为终态。
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Accepted)
                | (JobStatus::Pending, JobStatus::Expired)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Accepted, JobStatus::EnRoute)
                | (JobStatus::Accepted, JobStatus::Cancelled)
                | (JobStatus::EnRoute, JobStatus::Delivered)
                | (JobStatus::EnRoute, JobStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Delivered | JobStatus::Cancelled | JobStatus::Expired
        )
    }

    /// 客户侧取消只允许在水车出发之前
    pub fn is_customer_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Accepted)
    }

    /// 计入水车排队长度的状态
    pub fn counts_toward_queue(&self) -> bool {
        matches!(self, JobStatus::Accepted | JobStatus::EnRoute)
    }
}

impl sqlx::Type<sqlx::Postgres> for JobStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        JobStatus::parse(s).ok_or_else(|| format!("Invalid job status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 订单：一次送水请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub customer_user_id: i64,
    /// 接单水车，中标前为空；与price同时、且仅一次性写入
    pub truck_id: Option<i64>,
    pub status: JobStatus,
    /// 接单时锁定的价格
    pub price: Option<f64>,
    /// 送水地址（自由文本）
    pub location: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn location_point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }
}

/// 订单创建参数
#[derive(Debug, Clone)]
pub struct NewJob {
    pub customer_user_id: i64,
    pub location: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// 订单请求状态（全部为一次性终结：离开pending后不再变化）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobRequestStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "expired")]
    Expired,
}

impl JobRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRequestStatus::Pending => "pending",
            JobRequestStatus::Accepted => "accepted",
            JobRequestStatus::Rejected => "rejected",
            JobRequestStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobRequestStatus::Pending),
            "accepted" => Some(JobRequestStatus::Accepted),
            "rejected" => Some(JobRequestStatus::Rejected),
            "expired" => Some(JobRequestStatus::Expired),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for JobRequestStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobRequestStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        JobRequestStatus::parse(s).ok_or_else(|| format!("Invalid job request status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobRequestStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 订单请求：一台候选水车对一个订单的报价资格
///
/// 同一订单至多允许一条请求到达accepted；某条accepted落库的同一
/// 工作单元内，其余pending请求全部置为expired。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: i64,
    pub job_id: i64,
    pub truck_id: i64,
    pub status: JobRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// 通知累积队列条目（按接收用户维度累计）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub user_id: i64,
    /// 节流窗口内累计的附近客户数，推送成功后清零
    pub customer_count: i32,
    pub last_customer_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Web Push 订阅凭据（每用户一条，新订阅覆盖旧订阅）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub user_id: i64,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 邀请：一次性令牌，把水车车主绑定进运营商车队
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: i64,
    pub operator_id: i64,
    pub token: String,
    pub used: bool,
    pub truck_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_strings_round_trip() {
        let all = [
            (JobStatus::Pending, "pending"),
            (JobStatus::Accepted, "accepted"),
            (JobStatus::EnRoute, "en_route"),
            (JobStatus::Delivered, "delivered"),
            (JobStatus::Cancelled, "cancelled"),
            (JobStatus::Expired, "expired"),
        ];
        for (status, wire) in all {
            assert_eq!(status.as_str(), wire);
            assert_eq!(JobStatus::parse(wire), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{wire}\""));
            let back: JobStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
        assert_eq!(JobStatus::parse("enroute"), None);
    }

    #[test]
    fn test_job_request_status_wire_strings() {
        for (status, wire) in [
            (JobRequestStatus::Pending, "pending"),
            (JobRequestStatus::Accepted, "accepted"),
            (JobRequestStatus::Rejected, "rejected"),
            (JobRequestStatus::Expired, "expired"),
        ] {
            assert_eq!(status.as_str(), wire);
            assert_eq!(JobRequestStatus::parse(wire), Some(status));
        }
    }

    #[test]
    fn test_operator_mode_wire_strings() {
        assert_eq!(OperatorMode::Delegated.as_str(), "delegated");
        assert_eq!(OperatorMode::Dispatcher.as_str(), "dispatcher");
        assert_eq!(
            OperatorMode::parse("dispatcher"),
            Some(OperatorMode::Dispatcher)
        );
        assert_eq!(OperatorMode::parse("manual"), None);
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        use JobStatus::*;
        let all = [Pending, Accepted, EnRoute, Delivered, Cancelled, Expired];
        let allowed = [
            (Pending, Accepted),
            (Pending, Expired),
            (Pending, Cancelled),
            (Accepted, EnRoute),
            (Accepted, Cancelled),
            (EnRoute, Delivered),
            (EnRoute, Cancelled),
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn test_terminal_and_cancellable_predicates() {
        assert!(JobStatus::Delivered.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Expired.is_terminal());
        assert!(!JobStatus::EnRoute.is_terminal());

        assert!(JobStatus::Pending.is_customer_cancellable());
        assert!(JobStatus::Accepted.is_customer_cancellable());
        assert!(!JobStatus::EnRoute.is_customer_cancellable());
        assert!(!JobStatus::Delivered.is_customer_cancellable());
    }

    #[test]
    fn test_truck_offline_predicate() {
        let cutoff = Utc::now();
        let mut truck = Truck::new(1, None, 30);

        // 未激活即视为离线
        truck.is_active = false;
        truck.last_seen_at = Some(cutoff + chrono::Duration::minutes(1));
        assert!(truck.is_offline(cutoff));

        // 激活但从未上报心跳
        truck.is_active = true;
        truck.last_seen_at = None;
        assert!(truck.is_offline(cutoff));

        // 激活且心跳在界限之内
        truck.last_seen_at = Some(cutoff + chrono::Duration::seconds(1));
        assert!(!truck.is_offline(cutoff));

        // 心跳早于界限
        truck.last_seen_at = Some(cutoff - chrono::Duration::seconds(1));
        assert!(truck.is_offline(cutoff));
    }

    #[test]
    fn test_truck_location_requires_both_coordinates() {
        let mut truck = Truck::new(1, None, 30);
        assert!(truck.location().is_none());
        truck.current_lat = Some(10.5);
        assert!(truck.location().is_none());
        truck.current_lng = Some(-61.4);
        let point = truck.location().unwrap();
        assert_eq!(point.lat, 10.5);
        assert_eq!(point.lng, -61.4);
    }
}
