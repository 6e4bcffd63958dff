//! 进程内 KeyValueStore 实现

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keystone_errors::{AppError, AppResult};
use keystone_ports::{KeyValueStore, StoreScript};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// 每累计这么多次写入，整体清理一次过期键
const SWEEP_EVERY_WRITES: usize = 256;

fn wrong_type(key: &str) -> AppError {
    AppError::validation(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// 进程内存储
///
/// 单个互斥锁保护全部数据，因此每个操作（包括脚本）天然原子；
/// 锁从不跨越 await。过期键在访问时惰性清理，另外每
/// [`SWEEP_EVERY_WRITES`] 次写入整体清理一次，不再访问的键也会被回收。
/// 时间取自 `tokio::time`，测试可用 `tokio::time::pause()` 推进
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 剩余存活时间，键不存在或没有过期时间时返回 None
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        live_entry(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// 当前存活的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 记录一次写入，到达间隔时清理全部过期键
    fn record_write(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            entries.retain(|_, entry| !entry.is_expired(now));
        }
    }

    fn incr_locked(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> AppResult<i64> {
        match live_entry(entries, key, now) {
            Some(entry) => {
                let Value::Str(raw) = &entry.value else {
                    return Err(wrong_type(key));
                };
                let current: i64 = raw.parse().map_err(|_| {
                    AppError::validation(format!("value of '{}' is not an integer", key))
                })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    AppError::validation(format!("increment of '{}' would overflow", key))
                })?;
                // INCR 保留原有过期时间
                entry.value = Value::Str(next.to_string());
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    fn compare_and_delete_locked(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        expected: &str,
        now: Instant,
    ) -> AppResult<i64> {
        let matches = match live_entry(entries, key, now) {
            Some(Entry {
                value: Value::Str(current),
                ..
            }) => current.as_str() == expected,
            Some(_) => return Err(wrong_type(key)),
            None => false,
        };

        if matches {
            entries.remove(key);
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

/// 取出未过期的条目，已过期的顺手删除
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn single_key<'a>(script: &StoreScript, keys: &[&'a str]) -> AppResult<&'a str> {
    match keys {
        [key] => Ok(*key),
        _ => Err(AppError::validation(format!(
            "script {} expects exactly one key, got {}",
            script.name,
            keys.len()
        ))),
    }
}

fn single_arg<'a>(script: &StoreScript, args: &[&'a str]) -> AppResult<&'a str> {
    match args {
        [arg] => Ok(*arg),
        _ => Err(AppError::validation(format!(
            "script {} expects exactly one argument, got {}",
            script.name,
            args.len()
        ))),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock();
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        self.record_write(&mut entries, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock();
        Ok(live_entry(&mut entries, key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(entry) = live_entry(&mut entries, key, now) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        self.record_write(&mut entries, now);
        Ok(true)
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let next = Self::incr_locked(&mut entries, key, now)?;
        self.record_write(&mut entries, now);
        Ok(next)
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>> {
        let mut entries = self.entries.lock();
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_put_all(&self, key: &str, fields: &HashMap<String, String>) -> AppResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.record_write(&mut entries, now);
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                value: Value::Hash(existing),
                ..
            }) => {
                existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(fields.clone()),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn eval_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> AppResult<i64> {
        let now = Instant::now();

        match script.name {
            name if name == StoreScript::COMPARE_AND_DELETE.name => {
                let key = single_key(script, keys)?;
                let expected = single_arg(script, args)?;
                let mut entries = self.entries.lock();
                Self::compare_and_delete_locked(&mut entries, key, expected, now)
            }
            name if name == StoreScript::INCR_WITH_TTL.name => {
                let key = single_key(script, keys)?;
                let ttl_secs: u64 = single_arg(script, args)?.parse().map_err(|_| {
                    AppError::validation(format!("script {} expects a TTL in seconds", name))
                })?;

                let mut entries = self.entries.lock();
                let current = Self::incr_locked(&mut entries, key, now)?;
                if current == 1 {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                    }
                }
                self.record_write(&mut entries, now);
                Ok(current)
            }
            other => Err(AppError::internal(format!(
                "script {} is not supported by the in-memory store",
                other
            ))),
        }
    }
}
