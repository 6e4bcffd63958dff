//! 登录会话存储
//!
//! 令牌对应一个 hash：`login:token:<token>`，字段由 [`HashCodec`] 显式映射。
//! 每次解析成功都会刷新 TTL，实现滑动过期

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use keystone_common::random_token;
use keystone_errors::{AppError, AppResult};
use keystone_ports::KeyValueStore;
use tracing::{debug, info, warn};

use crate::context::RequestContext;

/// 与 hash 字段互转
pub trait HashCodec: Sized {
    fn to_fields(&self) -> HashMap<String, String>;

    fn from_fields(fields: &HashMap<String, String>) -> AppResult<Self>;
}

/// 读取必填字段
pub fn required_field<'a>(fields: &'a HashMap<String, String>, name: &str) -> AppResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::serialization(format!("session field {} is missing", name)))
}

/// 读取并解析必填字段
pub fn parse_field<T>(fields: &HashMap<String, String>, name: &str) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    required_field(fields, name)?
        .parse()
        .map_err(|e| AppError::serialization(format!("session field {} is invalid: {}", name, e)))
}

/// 会话存储
pub struct SessionStore<U> {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
    ttl: Duration,
    _user: PhantomData<fn() -> U>,
}

impl<U: HashCodec> SessionStore<U> {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key_prefix: "login:token:".to_string(),
            ttl: Duration::from_secs(30 * 60),
            _user: PhantomData,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.key_prefix, token)
    }

    /// 创建会话，返回新令牌
    pub async fn create(&self, user: &U) -> AppResult<String> {
        let fields = user.to_fields();
        if fields.is_empty() {
            return Err(AppError::validation("session user has no fields"));
        }

        let token = random_token();
        let key = self.key(&token);
        self.store.hash_put_all(&key, &fields).await?;
        if let Err(e) = self.store.expire(&key, self.ttl).await {
            // 没有 TTL 的会话永不过期，必须删掉
            if let Err(cleanup) = self.store.delete(&key).await {
                warn!(error = %cleanup, "Failed to remove session without TTL");
            }
            return Err(e);
        }

        info!(ttl_secs = self.ttl.as_secs(), "Session created");
        Ok(token)
    }

    /// 解析令牌；令牌为空或会话不存在时返回 `None`
    pub async fn resolve(&self, token: &str) -> AppResult<Option<RequestContext<U>>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        let key = self.key(token);
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            debug!("Session not found or expired");
            return Ok(None);
        }

        let user = U::from_fields(&fields)?;
        self.store.expire(&key, self.ttl).await?;
        Ok(Some(RequestContext::authenticated(user)))
    }

    /// 注销会话
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }

        self.store.delete(&self.key(token)).await?;
        info!("Session revoked");
        Ok(())
    }
}
