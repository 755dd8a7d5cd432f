use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub truck: TruckConfig,
    pub notifications: NotificationsConfig,
    pub observability: ObservabilityConfig,
    pub app: AppInfoConfig,
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// API服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

/// 水车相关参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruckConfig {
    /// 超过该分钟数未上报心跳的水车视为离线
    pub offline_timeout_minutes: i64,
    /// 客户定位可用时的最大服务距离（公里）
    pub max_distance_km: f64,
    /// 新注册水车的默认平均接单时长（分钟）
    pub default_avg_job_minutes: i32,
    /// 前端上报位置的建议间隔（秒）
    pub location_update_interval_seconds: u64,
}

/// 推送通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub enabled: bool,
    /// 同一接收者两次推送之间的最小间隔（分钟）
    pub throttle_minutes: i64,
    pub vapid_subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    /// Web Push 中继网关地址
    pub gateway_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

/// 对外公开的应用信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfoConfig {
    pub name: String,
    pub url: String,
    pub country_code: String,
    pub phone_digits: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/watertruck".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            api: ApiConfig {
                bind_address: "0.0.0.0:8080".to_string(),
                cors_enabled: true,
                cors_origins: vec!["*".to_string()],
            },
            truck: TruckConfig {
                offline_timeout_minutes: 30,
                max_distance_km: 50.0,
                default_avg_job_minutes: 30,
                location_update_interval_seconds: 60,
            },
            notifications: NotificationsConfig {
                enabled: false,
                throttle_minutes: 15,
                vapid_subject: "mailto:admin@example.com".to_string(),
                vapid_public_key: String::new(),
                vapid_private_key: String::new(),
                gateway_url: String::new(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
            app: AppInfoConfig {
                name: "Water Truck".to_string(),
                url: String::new(),
                country_code: "+1".to_string(),
                phone_digits: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: WATERTRUCK_)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).context("构建默认配置失败")?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            // Try default config file locations
            let default_paths = [
                "config/watertruck.toml",
                "watertruck.toml",
                "/etc/watertruck/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("WATERTRUCK")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("加载配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置的基本合法性
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("database.url 不能为空"));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "database.max_connections 不能小于 min_connections"
            ));
        }
        if self.truck.offline_timeout_minutes <= 0 {
            return Err(anyhow::anyhow!("truck.offline_timeout_minutes 必须为正数"));
        }
        if self.truck.max_distance_km <= 0.0 {
            return Err(anyhow::anyhow!("truck.max_distance_km 必须为正数"));
        }
        if self.notifications.throttle_minutes < 0 {
            return Err(anyhow::anyhow!("notifications.throttle_minutes 不能为负数"));
        }
        if self.notifications.enabled && self.notifications.gateway_url.is_empty() {
            return Err(anyhow::anyhow!(
                "启用通知时 notifications.gateway_url 不能为空"
            ));
        }
        Ok(())
    }
}
