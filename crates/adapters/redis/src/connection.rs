//! Redis 连接管理

use std::time::Duration;

use keystone_errors::{AppError, AppResult};
use redis::Client;
use redis::aio::ConnectionManager;

/// 创建 Redis 连接管理器
pub async fn create_connection_manager(url: &str) -> AppResult<ConnectionManager> {
    let client = Client::open(url)
        .map_err(|e| AppError::internal(format!("Failed to create Redis client: {}", e)))?;

    ConnectionManager::new(client).await.map_err(|e| {
        AppError::store_unavailable(format!("Failed to create Redis connection manager: {}", e))
    })
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager, timeout: Duration) -> AppResult<()> {
    let cmd = redis::cmd("PING");
    let ping = cmd.query_async::<String>(conn);

    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(AppError::store_unavailable(format!(
            "Redis health check failed: {}",
            e
        ))),
        Err(_) => Err(AppError::store_unavailable("Redis health check timed out")),
    }
}
