//! keystone-coordination - 基于共享键值存储的并发协调原语
//!
//! - [`StoreLock`]：带 owner token 的分布式锁，原子比较删除释放
//! - [`CacheClient`]：旁路缓存，防穿透（空值墓碑）与防击穿（互斥重建）
//! - [`IdWorker`]：时间戳 + 每日序列号的全局唯一 ID
//! - [`SessionStore`]：登录令牌到用户信息的 hash 存储
//!
//! 所有互斥都委托给存储端的原子操作，进程内不持有任何协调状态

mod cache;
mod context;
mod id;
mod lock;
mod session;

pub use cache::*;
pub use context::*;
pub use id::*;
pub use lock::*;
pub use session::*;
