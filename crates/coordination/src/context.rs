//! 请求上下文
//!
//! 显式传递调用方身份与取消信号，调用结束即随值释放

use tokio_util::sync::CancellationToken;

/// 请求上下文
#[derive(Debug, Clone)]
pub struct RequestContext<U = ()> {
    caller: Option<U>,
    cancellation: CancellationToken,
}

impl<U> RequestContext<U> {
    /// 匿名上下文
    pub fn anonymous() -> Self {
        Self {
            caller: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// 已认证上下文
    pub fn authenticated(caller: U) -> Self {
        Self {
            caller: Some(caller),
            cancellation: CancellationToken::new(),
        }
    }

    /// 绑定外部取消信号（例如请求超时或服务关闭）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn caller(&self) -> Option<&U> {
        self.caller.as_ref()
    }

    pub fn into_caller(self) -> Option<U> {
        self.caller
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 等待取消
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

impl<U> Default for RequestContext<U> {
    fn default() -> Self {
        Self::anonymous()
    }
}
