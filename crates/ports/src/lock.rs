//! 分布式锁 trait 定义

use std::time::Duration;

use async_trait::async_trait;

/// 分布式锁
///
/// 实现方持有自己的 owner token；获取失败或存储故障都返回 `false`，
/// 释放只删除自己持有的锁，失败时只记录日志
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试获取锁，不阻塞、不重试
    async fn acquire(&self, name: &str, lease: Duration) -> bool;

    /// 释放锁
    async fn release(&self, name: &str);
}
