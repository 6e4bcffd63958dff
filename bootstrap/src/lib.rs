//! keystone-bootstrap - 统一启动骨架
//!
//! 加载配置、初始化遥测、连接存储，并从同一份配置派生协调原语

mod infrastructure;
mod runtime;
mod shutdown;

pub use infrastructure::*;
pub use runtime::*;
pub use shutdown::*;
