//! ports - 抽象 trait 层
//!
//! 定义共享键值存储与分布式锁的抽象接口，具体实现位于 adapters

mod lock;
mod script;
mod store;

pub use lock::*;
pub use script::*;
pub use store::*;
