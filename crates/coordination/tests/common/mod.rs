//! 测试辅助：可注入故障的存储包装

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keystone_adapter_memory::MemoryStore;
use keystone_errors::{AppError, AppResult};
use keystone_ports::{KeyValueStore, StoreScript};

/// 包装 MemoryStore，按开关让指定操作返回 `StoreUnavailable`
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_get: AtomicBool,
    pub fail_set: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_expire: AtomicBool,
    pub fail_set_if_absent: AtomicBool,
    pub fail_eval: AtomicBool,
    pub set_if_absent_calls: AtomicUsize,
    /// 下一次 set_if_absent 之前先写入的键值，模拟另一个实例抢先回填
    pub write_before_set_if_absent: Mutex<Option<(String, String)>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn write_before_next_set_if_absent(&self, key: &str, value: &str) {
        *self.write_before_set_if_absent.lock().unwrap() = Some((key.to_string(), value.to_string()));
    }

    pub fn fail(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> AppResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::store_unavailable(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Self::check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        Self::check(&self.fail_set, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        Self::check(&self.fail_delete, "delete")?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        Self::check(&self.fail_expire, "expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        self.set_if_absent_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.write_before_set_if_absent.lock().unwrap().take();
        if let Some((pending_key, pending_value)) = pending {
            self.inner.set(&pending_key, &pending_value, None).await?;
        }
        Self::check(&self.fail_set_if_absent, "set_if_absent")?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        self.inner.incr(key).await
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> AppResult<()> {
        self.inner.hash_put_all(key, fields).await
    }

    async fn eval_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> AppResult<i64> {
        Self::check(&self.fail_eval, "eval_script")?;
        self.inner.eval_script(script, keys, args).await
    }
}
