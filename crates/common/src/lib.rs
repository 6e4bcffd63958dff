//! common - 通用类型和工具库

pub mod clock;
pub mod retry;
pub mod utils;

pub use clock::*;
pub use retry::*;
pub use utils::*;
