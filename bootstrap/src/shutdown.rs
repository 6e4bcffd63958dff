//! Graceful Shutdown

use std::future::Future;

use keystone_errors::AppResult;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown 控制器
///
/// 子令牌可以放进 `RequestContext`，关闭时正在退避等待的缓存查询会立即返回
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 派生子令牌，取消子令牌不影响控制器
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 等待关闭（已关闭时立即返回）
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// 运行带有 graceful shutdown 的任务
pub async fn run_with_shutdown<F, Fut>(shutdown: &ShutdownController, task: F) -> AppResult<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<()>> + Send,
{
    tokio::select! {
        result = task() => result,
        _ = shutdown.wait() => {
            info!("Task cancelled due to shutdown");
            Ok(())
        }
    }
}
