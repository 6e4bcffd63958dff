//! keystone-config - 配置加载库
//!
//! 加载顺序：`default.toml` → `<APP_ENV>.toml` → `KEYSTONE_` 前缀环境变量（`__` 分隔层级）

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// 所有键的全局前缀（可选）
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
    /// 安装 Prometheus recorder
    #[serde(default)]
    pub metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,
    /// 空值（墓碑）TTL，远小于实体 TTL
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ratio")]
    pub retry_jitter_ratio: f64,
    /// 实体 TTL 抖动范围（秒），0 表示不抖动
    #[serde(default)]
    pub ttl_jitter_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl_secs: default_entity_ttl_secs(),
            null_ttl_secs: default_null_ttl_secs(),
            lock_lease_secs: default_lock_lease_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_ratio: default_retry_jitter_ratio(),
            ttl_jitter_secs: 0,
        }
    }
}

impl CacheConfig {
    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    /// 校验取值范围；TTL 为 0 的写入会被存储拒绝或立即过期
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity_ttl_secs == 0 {
            return Err(invalid("cache.entity_ttl_secs must be greater than 0"));
        }
        if self.null_ttl_secs == 0 || self.null_ttl_secs >= self.entity_ttl_secs {
            return Err(invalid(format!(
                "cache.null_ttl_secs must be in 1..{} (entity_ttl_secs), got {}",
                self.entity_ttl_secs, self.null_ttl_secs
            )));
        }
        if self.lock_lease_secs == 0 {
            return Err(invalid("cache.lock_lease_secs must be greater than 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("cache.retry_max_attempts must be greater than 0"));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(invalid(format!(
                "cache.retry_initial_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_initial_delay_ms, self.retry_max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_ratio) {
            return Err(invalid(format!(
                "cache.retry_jitter_ratio must be within 0.0..=1.0, got {}",
                self.retry_jitter_ratio
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn default_entity_ttl_secs() -> u64 {
    30 * 60
}

fn default_null_ttl_secs() -> u64 {
    2 * 60
}

fn default_lock_lease_secs() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    50
}

fn default_retry_initial_delay_ms() -> u64 {
    50
}

fn default_retry_max_delay_ms() -> u64 {
    500
}

fn default_retry_jitter_ratio() -> f64 {
    0.5
}

/// ID 生成配置
#[derive(Debug, Clone, Deserialize)]
pub struct IdConfig {
    /// 起始时间戳（秒），一旦发号后不可修改
    #[serde(default = "default_epoch_seconds")]
    pub epoch_seconds: i64,
    #[serde(default = "default_id_key_prefix")]
    pub key_prefix: String,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            epoch_seconds: default_epoch_seconds(),
            key_prefix: default_id_key_prefix(),
        }
    }
}

fn default_epoch_seconds() -> i64 {
    // 2026-01-01T00:00:00Z
    1_767_225_600
}

fn default_id_key_prefix() -> String {
    "icr:".to_string()
}

/// 登录会话配置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_minutes == 0 {
            return Err(invalid("session.ttl_minutes must be greater than 0"));
        }
        Ok(())
    }
}

fn default_session_ttl_minutes() -> u64 {
    30
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub redis: RedisConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub id: IdConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_app_name() -> String {
    "keystone".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("KEYSTONE_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 Figment 提取并校验配置
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 校验各分区的取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.session.validate()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
