//! 全局唯一 ID 生成
//!
//! 布局：高位为距纪元的秒数，低 `sequence_bits` 位为每日计数器。
//! 计数器键 `icr:<space>:<yyyy:MM:dd>`，每个业务空间每天一个

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keystone_common::{Clock, SystemClock};
use keystone_errors::{AppError, AppResult};
use keystone_ports::KeyValueStore;
use tracing::{debug, error};

/// 默认纪元：2026-01-01T00:00:00Z
pub const DEFAULT_EPOCH_SECONDS: i64 = 1_767_225_600;

const DAY_FORMAT: &str = "%Y:%m:%d";

/// ID 生成配置
#[derive(Debug, Clone)]
pub struct IdWorkerConfig {
    /// 纪元（Unix 秒）
    pub epoch_seconds: i64,
    /// 计数器键前缀
    pub key_prefix: String,
    /// 序列号位宽
    pub sequence_bits: u32,
    /// 计数器 TTL；`None` 时计数器永久保留
    pub counter_ttl: Option<Duration>,
}

impl Default for IdWorkerConfig {
    fn default() -> Self {
        Self {
            epoch_seconds: DEFAULT_EPOCH_SECONDS,
            key_prefix: "icr:".to_string(),
            sequence_bits: 32,
            counter_ttl: None,
        }
    }
}

impl IdWorkerConfig {
    pub fn with_epoch(mut self, epoch_seconds: i64) -> Self {
        self.epoch_seconds = epoch_seconds;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// 设置序列号位宽（1..=32）
    pub fn with_sequence_bits(mut self, bits: u32) -> Self {
        self.sequence_bits = bits.clamp(1, 32);
        self
    }

    /// 计数器跨天后不再使用，设置 TTL 可以让存储回收
    pub fn with_counter_ttl(mut self, ttl: Duration) -> Self {
        self.counter_ttl = Some(ttl);
        self
    }

    fn max_sequence(&self) -> u64 {
        (1_u64 << self.sequence_bits) - 1
    }
}

/// ID 的组成部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// 距纪元的秒数
    pub timestamp: u64,
    /// 当日序列号
    pub sequence: u64,
}

impl IdParts {
    /// 生成时刻（秒精度）
    pub fn issued_at(&self, epoch_seconds: i64) -> Option<DateTime<Utc>> {
        let seconds = epoch_seconds.checked_add(i64::try_from(self.timestamp).ok()?)?;
        DateTime::from_timestamp(seconds, 0)
    }
}

/// ID 生成器
pub struct IdWorker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: IdWorkerConfig,
}

impl IdWorker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, IdWorkerConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: IdWorkerConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// 替换时钟（测试使用 `ManualClock`）
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &IdWorkerConfig {
        &self.config
    }

    /// 计数器键
    pub fn counter_key(&self, space: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}:{}",
            self.config.key_prefix,
            space,
            at.format(DAY_FORMAT)
        )
    }

    /// 生成下一个 ID
    ///
    /// 同一空间内，同一秒生成的 ID 按计数器递增，跨秒的 ID 时间戳部分更大
    pub async fn next_id(&self, space: &str) -> AppResult<u64> {
        if space.trim().is_empty() {
            return Err(AppError::validation("id space must not be empty"));
        }

        let now = self.clock.now();
        let elapsed = now.timestamp() - self.config.epoch_seconds;
        if elapsed < 0 {
            return Err(AppError::failed_precondition(format!(
                "clock {} is before id epoch {}",
                now, self.config.epoch_seconds
            )));
        }

        let key = self.counter_key(space, now);
        let sequence = match self.config.counter_ttl {
            Some(ttl) => self.store.incr_with_ttl(&key, ttl.as_secs().max(1)).await?,
            None => self.store.incr(&key).await?,
        };

        let max_sequence = self.config.max_sequence();
        if sequence <= 0 || sequence as u64 > max_sequence {
            error!(
                key = %key,
                sequence,
                max_sequence,
                "Id sequence out of range"
            );
            return Err(AppError::resource_exhausted(format!(
                "sequence {} for {} exceeds {} bits",
                sequence, key, self.config.sequence_bits
            )));
        }

        let id = ((elapsed as u64) << self.config.sequence_bits) | sequence as u64;
        debug!(space, id, sequence, "Id generated");
        Ok(id)
    }

    /// 拆分 ID
    pub fn decompose(&self, id: u64) -> IdParts {
        let bits = self.config.sequence_bits;
        IdParts {
            timestamp: id >> bits,
            sequence: id & self.config.max_sequence(),
        }
    }
}
