//! 共享键值存储 trait 定义

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use keystone_errors::AppResult;

use crate::StoreScript;

/// 共享键值存储
///
/// 每个操作在存储端都是原子的；传输失败统一映射为 `AppError::StoreUnavailable`
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 获取值，`None` 表示键不存在；空字符串是合法值
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 设置值，`ttl` 为 `None` 时不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// 删除键
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 检查是否存在
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// 设置过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()>;

    /// 键不存在时写入并设置 TTL（同一原子步骤），返回是否写入
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// 原子自增，不存在时从 0 开始
    async fn incr(&self, key: &str) -> AppResult<i64>;

    /// 读取整个 hash，不存在时返回空表
    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>>;

    /// 写入多个 hash 字段
    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> AppResult<()>;

    /// 原子执行服务端脚本
    async fn eval_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> AppResult<i64>;

    /// 值等于 `expected` 时删除，返回是否删除
    async fn delete_if_equals(&self, key: &str, expected: &str) -> AppResult<bool> {
        let deleted = self
            .eval_script(&StoreScript::COMPARE_AND_DELETE, &[key], &[expected])
            .await?;
        Ok(deleted > 0)
    }

    /// 原子自增，首次创建时设置 TTL（秒）
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> AppResult<i64> {
        let ttl = ttl_secs.to_string();
        self.eval_script(&StoreScript::INCR_WITH_TTL, &[key], &[ttl.as_str()])
            .await
    }
}
