//! 基于共享存储的分布式锁
//!
//! 获取：`SET lock:<name> <token> NX PX <lease>`，写入与租期在同一原子步骤
//! 释放：比较并删除脚本，只删除仍属于自己的锁

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use derive_more::Display;
use keystone_errors::{AppError, AppResult};
use keystone_ports::{DistributedLock, KeyValueStore};
use once_cell::sync::Lazy;
use tracing::{debug, warn};
use uuid::Uuid;

/// 进程实例标识，进程生命周期内不变
static PROCESS_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().simple().to_string());

/// 进程内持有者序号
static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// 锁持有者标识：`<进程 UUID>-<持有者序号>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{_0}")]
pub struct OwnerToken(String);

impl OwnerToken {
    /// 生成新的持有者标识，进程内不重复，跨进程由 UUID 区分
    pub fn generate() -> Self {
        let holder = NEXT_HOLDER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", *PROCESS_ID, holder))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 分布式锁
///
/// 一个实例对应一个执行单元（一次请求或一个任务）；并发任务各自创建实例，
/// 因此不会共享 owner token。不实现 `Clone`
pub struct StoreLock {
    store: Arc<dyn KeyValueStore>,
    lock_prefix: String,
    owner: OwnerToken,
}

impl StoreLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock_prefix: "lock:".to_string(),
            owner: OwnerToken::generate(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    pub fn owner_token(&self) -> &OwnerToken {
        &self.owner
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.lock_prefix, name)
    }

    /// 持锁执行；拿不到锁立即返回 `Conflict`，不论 `task` 成败都会释放
    pub async fn with_lock<F, T>(&self, name: &str, lease: Duration, task: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
        T: Send,
    {
        if !self.acquire(name, lease).await {
            return Err(AppError::conflict(format!("lock {} is held by another owner", name)));
        }

        let result = task.await;
        self.release(name).await;
        result
    }
}

#[async_trait]
impl DistributedLock for StoreLock {
    async fn acquire(&self, name: &str, lease: Duration) -> bool {
        let key = self.lock_key(name);

        match self.store.set_if_absent(&key, self.owner.as_str(), lease).await {
            Ok(acquired) => {
                debug!(lock = %key, owner = %self.owner, acquired, "Lock acquire attempted");
                acquired
            }
            Err(e) => {
                // 存储故障按未获取处理，宁可不互斥也不误判持有
                warn!(lock = %key, error = %e, "Lock acquire failed, treating as not acquired");
                false
            }
        }
    }

    async fn release(&self, name: &str) {
        let key = self.lock_key(name);

        match self.store.delete_if_equals(&key, self.owner.as_str()).await {
            Ok(true) => debug!(lock = %key, owner = %self.owner, "Lock released"),
            Ok(false) => debug!(
                lock = %key,
                owner = %self.owner,
                "Lock not owned at release time, nothing to delete"
            ),
            Err(e) => warn!(
                lock = %key,
                error = %e,
                "Lock release failed, lease expiry will reclaim it"
            ),
        }
    }
}
