//! 基础设施资源管理
//!
//! 持有共享存储，并按配置构造锁、缓存客户端、ID 生成器和会话存储

use std::sync::Arc;
use std::time::Duration;

use keystone_adapter_redis::{RedisConfig, RedisStore};
use keystone_common::RetryConfig;
use keystone_config::AppConfig;
use keystone_coordination::{
    CacheClient, CachePolicy, HashCodec, IdWorker, IdWorkerConfig, SessionStore, StoreLock,
};
use keystone_errors::AppResult;
use keystone_ports::KeyValueStore;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

/// 基础设施资源容器
pub struct Infrastructure {
    /// 应用配置
    config: AppConfig,
    /// 共享存储
    store: Arc<dyn KeyValueStore>,
    /// Redis 存储（用于健康检查；使用其他存储时为空）
    redis: Option<Arc<RedisStore>>,
    /// ID 生成器，进程内共享
    id_worker: Arc<IdWorker>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源（Redis 连接带重试）
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let mut redis_config = RedisConfig::new(config.redis.url.expose_secret().clone());
        if let Some(prefix) = &config.redis.key_prefix {
            redis_config = redis_config.with_key_prefix(prefix.clone());
        }

        let redis = Arc::new(RedisStore::connect(redis_config).await?);
        info!(app_name = %config.app_name, "Redis store ready");

        let mut infra = Self::with_store(config, redis.clone());
        infra.redis = Some(redis);
        Ok(infra)
    }

    /// 使用已有存储创建（测试或单机开发使用内存存储）
    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let id_config = IdWorkerConfig::default()
            .with_epoch(config.id.epoch_seconds)
            .with_key_prefix(config.id.key_prefix.clone());
        let id_worker = Arc::new(IdWorker::with_config(store.clone(), id_config));

        Self {
            config,
            store,
            redis: None,
            id_worker,
        }
    }

    /// 获取应用配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取共享存储
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// 获取 ID 生成器
    pub fn id_worker(&self) -> Arc<IdWorker> {
        self.id_worker.clone()
    }

    /// 创建分布式锁（每个执行单元一个实例）
    pub fn lock(&self) -> StoreLock {
        StoreLock::new(self.store.clone())
    }

    /// 由配置派生的缓存策略
    pub fn cache_policy(&self) -> CachePolicy {
        let cache = &self.config.cache;
        let retry = RetryConfig::new(
            cache.retry_max_attempts,
            Duration::from_millis(cache.retry_initial_delay_ms),
            Duration::from_millis(cache.retry_max_delay_ms),
        )
        .with_multiplier(1.5)
        .with_jitter(cache.retry_jitter_ratio);

        CachePolicy::default()
            .with_entity_ttl(cache.entity_ttl())
            .with_null_ttl(cache.null_ttl())
            .with_lock_lease(cache.lock_lease())
            .with_retry(retry)
            .with_ttl_jitter(Duration::from_secs(cache.ttl_jitter_secs))
    }

    /// 创建某个实体命名空间的缓存客户端，例如 `cache:shop:`
    pub fn cache_client<T>(&self, namespace: &str) -> CacheClient<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        CacheClient::with_policy(self.store.clone(), namespace, self.cache_policy())
    }

    /// 创建会话存储
    pub fn session_store<U: HashCodec>(&self) -> SessionStore<U> {
        SessionStore::new(self.store.clone()).with_ttl(self.config.session.ttl())
    }

    /// 检查存储连接
    pub async fn health_check(&self) -> AppResult<()> {
        match &self.redis {
            Some(redis) => redis.ping().await,
            None => Ok(()),
        }
    }
}
