//! keystone-adapter-memory - 进程内键值存储
//!
//! 语义与 Redis 适配器保持一致（TTL、NX、原子脚本），用于测试和单机开发

mod store;

pub use store::*;
