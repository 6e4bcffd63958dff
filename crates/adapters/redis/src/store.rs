//! Redis KeyValueStore 实现

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use keystone_common::with_retry;
use keystone_errors::{AppError, AppResult};
use keystone_ports::{KeyValueStore, StoreScript};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::info;

use crate::config::RedisConfig;
use crate::connection::{check_connection, create_connection_manager};

/// Redis 存储
///
/// `ConnectionManager` 克隆开销很小，每次命令克隆一份
pub struct RedisStore {
    conn: ConnectionManager,
    config: RedisConfig,
    /// 预加载的脚本句柄，EVALSHA 未命中时自动 SCRIPT LOAD
    scripts: HashMap<&'static str, Script>,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, config: RedisConfig) -> Self {
        let scripts = StoreScript::BUILTIN
            .iter()
            .map(|script| (script.name, Script::new(script.source)))
            .collect();

        Self {
            conn,
            config,
            scripts,
        }
    }

    /// 按配置建立连接（带重试）
    pub async fn connect(config: RedisConfig) -> AppResult<Self> {
        let retry = config.retry_config();
        let url = config.url.clone();
        let conn = with_retry(&retry, "Redis connection", || {
            let url = url.clone();
            async move { create_connection_manager(&url).await }
        })
        .await?;

        info!(prefix = ?config.key_prefix, "Redis store connected");
        Ok(Self::new(conn, config))
    }

    /// 健康检查
    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        check_connection(&mut conn, self.config.health_check_timeout).await
    }

    fn key(&self, key: &str) -> String {
        self.config.prefixed_key(key)
    }

    fn script_handle(&self, script: &StoreScript) -> Script {
        self.scripts
            .get(script.name)
            .cloned()
            .unwrap_or_else(|| Script::new(script.source))
    }
}

/// PX 参数必须为正
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn store_error(operation: &'static str) -> impl FnOnce(RedisError) -> AppError {
    move |e| AppError::store_unavailable(format!("Redis {} failed: {}", operation, e))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(store_error("get"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(store_error("set"))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.key(key)).await.map_err(store_error("delete"))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.key(key)).await.map_err(store_error("exists"))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(ttl_millis(ttl))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(store_error("expire"))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();

        // SET NX PX：写入与过期时间在同一条命令中完成
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error("set_if_absent"))?;

        Ok(result.is_some())
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(self.key(key), 1_i64)
            .await
            .map_err(store_error("incr"))
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(self.key(key))
            .await
            .map_err(store_error("hash_get_all"))
    }

    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> AppResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.key(key));
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        cmd.query_async::<i64>(&mut conn)
            .await
            .map_err(store_error("hash_put_all"))?;
        Ok(())
    }

    async fn eval_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let handle = self.script_handle(script);

        let mut invocation = handle.prepare_invoke();
        for key in keys {
            invocation.key(self.key(key));
        }
        for arg in args {
            invocation.arg(*arg);
        }

        let result: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                AppError::store_unavailable(format!(
                    "Redis script {} failed: {}",
                    script.name, e
                ))
            })?;
        Ok(result)
    }
}
