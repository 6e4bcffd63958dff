//! 通用工具函数

use uuid::Uuid;

/// 生成不带连字符的随机令牌（UUID v4）
pub fn random_token() -> String {
    Uuid::new_v4().simple().to_string()
}
