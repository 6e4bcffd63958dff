//! 旁路缓存
//!
//! 每个键处于三种状态之一：不存在、墓碑（空字符串，确认不存在）、已填充。
//! 查询未命中时只有拿到重建锁的调用方访问数据源，其余调用方退避后重读缓存

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keystone_common::RetryConfig;
use keystone_errors::{AppError, AppResult};
use keystone_ports::{DistributedLock, KeyValueStore};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::lock::StoreLock;

/// 墓碑值
const TOMBSTONE: &str = "";

const QUERIES_METRIC: &str = "keystone_cache_queries_total";
const CONTENTION_METRIC: &str = "keystone_cache_lock_contention_total";

/// 缓存策略
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// 实体 TTL
    pub entity_ttl: Duration,
    /// 墓碑 TTL，应远小于实体 TTL，限制新建实体被隐藏的时长
    pub null_ttl: Duration,
    /// 重建锁租期
    pub lock_lease: Duration,
    /// 重建锁前缀
    pub lock_prefix: String,
    /// 抢锁失败后的退避策略，`max_attempts` 为抢锁总次数上限
    pub retry: RetryConfig,
    /// 实体 TTL 抖动范围，防止大量键同时过期
    pub ttl_jitter: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(30 * 60),
            null_ttl: Duration::from_secs(2 * 60),
            lock_lease: Duration::from_secs(10),
            lock_prefix: "lock:".to_string(),
            retry: RetryConfig::new(50, Duration::from_millis(50), Duration::from_millis(500))
                .with_multiplier(1.5)
                .with_jitter(0.5),
            ttl_jitter: Duration::ZERO,
        }
    }
}

impl CachePolicy {
    pub fn with_entity_ttl(mut self, ttl: Duration) -> Self {
        self.entity_ttl = ttl;
        self
    }

    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl = ttl;
        self
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttl_jitter(mut self, jitter: Duration) -> Self {
        self.ttl_jitter = jitter;
        self
    }

    /// 实体 TTL 加随机抖动
    /// 例如：TTL 300 秒，抖动 30 秒，则实际 TTL 在 285-315 秒之间
    fn jittered_entity_ttl(&self) -> Duration {
        let range_ms = self.ttl_jitter.as_millis() as u64;
        if range_ms == 0 {
            return self.entity_ttl;
        }

        let half = range_ms / 2;
        let offset = rand::thread_rng().gen_range(0..=range_ms);
        let base_ms = self.entity_ttl.as_millis() as u64;
        let ttl_ms = (base_ms + offset).saturating_sub(half).max(1);
        Duration::from_millis(ttl_ms)
    }
}

/// 单次缓存读取结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// 已填充
    Hit(T),
    /// 墓碑：数据源确认不存在
    Tombstone,
    /// 未缓存
    Absent,
}

/// 数据源加载器
#[async_trait]
pub trait EntityLoader<I, T>: Send + Sync {
    /// 加载实体，`None` 表示数据源中不存在
    async fn load(&self, id: I) -> AppResult<Option<T>>;
}

#[async_trait]
impl<I, T, F, Fut> EntityLoader<I, T> for F
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<Option<T>>> + Send + 'static,
{
    async fn load(&self, id: I) -> AppResult<Option<T>> {
        (self)(id).await
    }
}

/// 旁路缓存客户端，一个实例对应一个实体命名空间（如 `cache:shop:`）
pub struct CacheClient<T> {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    policy: CachePolicy,
    _entity: PhantomData<fn() -> T>,
}

impl<T> CacheClient<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self::with_policy(store, namespace, CachePolicy::default())
    }

    pub fn with_policy(
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy,
            _entity: PhantomData,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// 缓存键
    pub fn key(&self, id: &impl Display) -> String {
        format!("{}{}", self.namespace, id)
    }

    fn decode(&self, key: &str, raw: &str) -> AppResult<CacheLookup<T>> {
        if raw == TOMBSTONE {
            return Ok(CacheLookup::Tombstone);
        }

        serde_json::from_str(raw)
            .map(CacheLookup::Hit)
            .map_err(|e| AppError::serialization(format!("malformed cache entry {}: {}", key, e)))
    }

    async fn read(&self, key: &str) -> AppResult<CacheLookup<T>> {
        match self.store.get(key).await? {
            Some(raw) => self.decode(key, &raw),
            None => Ok(CacheLookup::Absent),
        }
    }

    /// 读取缓存状态，不访问数据源
    pub async fn lookup<I: Display>(&self, id: &I) -> AppResult<CacheLookup<T>> {
        self.read(&self.key(id)).await
    }

    /// 查询实体（互斥重建），`Ok(None)` 表示实体不存在
    pub async fn query<I, L>(&self, id: I, loader: &L) -> AppResult<Option<T>>
    where
        I: Display + Clone + Send + Sync,
        L: EntityLoader<I, T> + ?Sized,
    {
        self.query_with(&RequestContext::<()>::anonymous(), id, loader)
            .await
    }

    /// 查询实体，退避等待可被上下文取消（返回 `Interrupted`）
    pub async fn query_with<U, I, L>(
        &self,
        ctx: &RequestContext<U>,
        id: I,
        loader: &L,
    ) -> AppResult<Option<T>>
    where
        U: Sync,
        I: Display + Clone + Send + Sync,
        L: EntityLoader<I, T> + ?Sized,
    {
        let key = self.key(&id);
        let max_attempts = self.policy.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.read(&key).await {
                Ok(lookup) => {
                    if let Some(cached) = Self::settled(lookup) {
                        return Ok(cached);
                    }
                }
                Err(AppError::StoreUnavailable(e)) => {
                    // 缓存不可读时锁也拿不到，直接回源且不回写
                    warn!(key = %key, error = %e, "Cache read failed, loading from source directly");
                    return loader.load(id).await;
                }
                Err(e) => return Err(e),
            }

            let lock = StoreLock::new(self.store.clone()).with_prefix(self.policy.lock_prefix.clone());
            if lock.acquire(&key, self.policy.lock_lease).await {
                let result = self.rebuild(&key, id.clone(), loader).await;
                lock.release(&key).await;
                return result;
            }

            metrics::counter!(CONTENTION_METRIC).increment(1);
            attempt += 1;
            if attempt >= max_attempts {
                warn!(key = %key, attempts = attempt, "Cache rebuild lock still contended, giving up");
                return Err(AppError::resource_exhausted(format!(
                    "cache rebuild lock for {} not acquired after {} attempts",
                    key, attempt
                )));
            }

            let delay = self.policy.retry.jittered_delay_for_attempt(attempt - 1);
            debug!(key = %key, attempt, delay_ms = delay.as_millis(), "Rebuild lock busy, backing off");
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(AppError::interrupted(format!(
                        "cancelled while waiting to rebuild {}",
                        key
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 命中实体或空值标记时计数并给出结果，未命中返回 `None`
    fn settled(lookup: CacheLookup<T>) -> Option<Option<T>> {
        match lookup {
            CacheLookup::Hit(entity) => {
                metrics::counter!(QUERIES_METRIC, "outcome" => "hit").increment(1);
                Some(Some(entity))
            }
            CacheLookup::Tombstone => {
                metrics::counter!(QUERIES_METRIC, "outcome" => "tombstone").increment(1);
                Some(None)
            }
            CacheLookup::Absent => None,
        }
    }

    /// 持锁重建：二次检查缓存，仍未命中才访问数据源
    async fn rebuild<I, L>(&self, key: &str, id: I, loader: &L) -> AppResult<Option<T>>
    where
        I: Send,
        L: EntityLoader<I, T> + ?Sized,
    {
        match self.read(key).await {
            Ok(lookup) => {
                if let Some(cached) = Self::settled(lookup) {
                    return Ok(cached);
                }
            }
            Err(AppError::StoreUnavailable(e)) => {
                warn!(key = %key, error = %e, "Cache double-check failed, treating as miss");
            }
            Err(e) => return Err(e),
        }

        let loaded = loader.load(id).await?;
        self.populate(key, loaded.as_ref()).await?;
        Ok(loaded)
    }

    /// 写入加载结果；存储写失败只记录日志，序列化失败向上返回
    async fn populate(&self, key: &str, loaded: Option<&T>) -> AppResult<()> {
        let (payload, ttl, outcome) = match loaded {
            Some(entity) => (
                serde_json::to_string(entity)?,
                self.policy.jittered_entity_ttl(),
                "loaded",
            ),
            None => (TOMBSTONE.to_string(), self.policy.null_ttl, "not_found"),
        };
        metrics::counter!(QUERIES_METRIC, "outcome" => outcome).increment(1);

        if let Err(e) = self.store.set(key, &payload, Some(ttl)).await {
            warn!(key = %key, error = %e, "Failed to populate cache entry");
        } else {
            debug!(key = %key, ttl_ms = ttl.as_millis(), outcome, "Cache entry populated");
        }
        Ok(())
    }

    /// 仅防穿透的查询：不加锁，未命中直接回源并回写
    pub async fn query_pass_through<I, L>(&self, id: I, loader: &L) -> AppResult<Option<T>>
    where
        I: Display + Send,
        L: EntityLoader<I, T> + ?Sized,
    {
        let key = self.key(&id);
        match self.read(&key).await {
            Ok(lookup) => {
                if let Some(cached) = Self::settled(lookup) {
                    return Ok(cached);
                }
            }
            Err(AppError::StoreUnavailable(e)) => {
                warn!(key = %key, error = %e, "Cache read failed, loading from source directly");
                return loader.load(id).await;
            }
            Err(e) => return Err(e),
        }

        let loaded = loader.load(id).await?;
        self.populate(&key, loaded.as_ref()).await?;
        Ok(loaded)
    }

    /// 主动写入实体（预热）
    pub async fn put<I: Display>(&self, id: &I, entity: &T) -> AppResult<()> {
        let payload = serde_json::to_string(entity)?;
        self.store
            .set(&self.key(id), &payload, Some(self.policy.jittered_entity_ttl()))
            .await
    }

    /// 删除缓存条目（不区分墓碑与实体），存储故障向上返回
    pub async fn invalidate<I: Display>(&self, id: &I) -> AppResult<()> {
        let key = self.key(id);
        self.store.delete(&key).await?;
        debug!(key = %key, "Cache entry invalidated");
        Ok(())
    }

    /// 先写数据源、成功后再删缓存
    ///
    /// 反过来的顺序会让并发读在提交前把旧数据重新写回缓存
    pub async fn update<I, F, R>(&self, id: &I, write: F) -> AppResult<R>
    where
        I: Display + Sync,
        F: Future<Output = AppResult<R>> + Send,
        R: Send,
    {
        let result = write.await?;
        self.invalidate(id).await?;
        Ok(result)
    }
}
