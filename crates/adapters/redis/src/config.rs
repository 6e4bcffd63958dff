//! Redis 配置模块

use std::time::Duration;

use keystone_common::RetryConfig;

/// Redis 配置
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL（单机模式）
    pub url: String,
    /// 键前缀
    pub key_prefix: Option<String>,
    /// 健康检查超时
    pub health_check_timeout: Duration,

    // 连接建立的重试配置
    /// 最大重试次数
    pub retry_max_attempts: u32,
    /// 初始重试延迟
    pub retry_initial_delay: Duration,
    /// 最大重试延迟
    pub retry_max_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            health_check_timeout: Duration::from_secs(5),
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// 创建新的配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// 设置健康检查超时
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// 设置重试配置
    pub fn with_retry(
        mut self,
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_initial_delay = initial_delay;
        self.retry_max_delay = max_delay;
        self
    }

    /// 连接建立使用的重试配置
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_max_attempts,
            self.retry_initial_delay,
            self.retry_max_delay,
        )
        .with_jitter(0.2)
    }

    /// 获取带前缀的键
    pub fn prefixed_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
