//! 分布式锁测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FlakyStore;
use keystone_adapter_memory::MemoryStore;
use keystone_coordination::StoreLock;
use keystone_errors::AppError;
use keystone_ports::{DistributedLock, KeyValueStore};

fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

// ============================================================================
// 互斥
// ============================================================================

#[tokio::test]
async fn test_second_owner_blocked_until_release() {
    let store = memory_store();
    let first = StoreLock::new(store.clone());
    let second = StoreLock::new(store.clone());

    assert!(first.acquire("order:1", Duration::from_secs(10)).await);
    assert!(!second.acquire("order:1", Duration::from_secs(10)).await);

    first.release("order:1").await;
    assert!(second.acquire("order:1", Duration::from_secs(10)).await);
}

#[tokio::test]
async fn test_lock_value_is_owner_token() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone());

    assert!(lock.acquire("order:1", Duration::from_secs(10)).await);
    assert_eq!(
        store.get("lock:order:1").await.unwrap(),
        Some(lock.owner_token().to_string())
    );
    assert!(store.remaining_ttl("lock:order:1").is_some());
}

#[tokio::test]
async fn test_release_by_other_owner_is_noop() {
    let store = memory_store();
    let holder = StoreLock::new(store.clone());
    let intruder = StoreLock::new(store.clone());

    assert!(holder.acquire("order:1", Duration::from_secs(10)).await);
    intruder.release("order:1").await;

    assert_eq!(
        store.get("lock:order:1").await.unwrap(),
        Some(holder.owner_token().to_string())
    );
}

#[tokio::test]
async fn test_release_without_acquire_is_noop() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone());

    lock.release("order:1").await;
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_single_winner() {
    let store = memory_store();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let lock = StoreLock::new(store);
                lock.acquire("stock:9", Duration::from_secs(10)).await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

// ============================================================================
// 租期
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_lease_does_not_release_new_owner() {
    let store = memory_store();
    let stale = StoreLock::new(store.clone());
    let fresh = StoreLock::new(store.clone());

    assert!(stale.acquire("order:1", Duration::from_secs(1)).await);
    tokio::time::advance(Duration::from_millis(1100)).await;

    assert!(fresh.acquire("order:1", Duration::from_secs(10)).await);

    // 旧持有者的释放不能删掉新持有者的锁
    stale.release("order:1").await;
    assert_eq!(
        store.get("lock:order:1").await.unwrap(),
        Some(fresh.owner_token().to_string())
    );

    fresh.release("order:1").await;
    assert_eq!(store.get("lock:order:1").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_owner_can_reacquire_after_expiry() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone());

    assert!(lock.acquire("order:1", Duration::from_secs(1)).await);
    assert!(!lock.acquire("order:1", Duration::from_secs(1)).await);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(lock.acquire("order:1", Duration::from_secs(1)).await);
}

// ============================================================================
// with_lock
// ============================================================================

#[tokio::test]
async fn test_with_lock_runs_task_and_releases() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone());

    let result = lock
        .with_lock("voucher:3", Duration::from_secs(5), async { Ok(7) })
        .await
        .unwrap();

    assert_eq!(result, 7);
    assert_eq!(store.get("lock:voucher:3").await.unwrap(), None);
}

#[tokio::test]
async fn test_with_lock_releases_on_task_error() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone());

    let result: Result<(), _> = lock
        .with_lock("voucher:3", Duration::from_secs(5), async {
            Err(AppError::validation("stock exhausted"))
        })
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(store.get("lock:voucher:3").await.unwrap(), None);
}

#[tokio::test]
async fn test_with_lock_conflict_when_held() {
    let store = memory_store();
    let holder = StoreLock::new(store.clone());
    let other = StoreLock::new(store.clone());
    assert!(holder.acquire("voucher:3", Duration::from_secs(5)).await);

    let result = other
        .with_lock("voucher:3", Duration::from_secs(5), async { Ok(()) })
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_custom_prefix() {
    let store = memory_store();
    let lock = StoreLock::new(store.clone()).with_prefix("mutex:");

    assert!(lock.acquire("job", Duration::from_secs(5)).await);
    assert!(store.exists("mutex:job").await.unwrap());
}

// ============================================================================
// 存储故障
// ============================================================================

#[tokio::test]
async fn test_acquire_store_failure_means_not_acquired() {
    let store = FlakyStore::new();
    FlakyStore::fail(&store.fail_set_if_absent, true);

    let lock = StoreLock::new(store.clone());
    assert!(!lock.acquire("order:1", Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_release_store_failure_is_swallowed() {
    let store = FlakyStore::new();
    let lock = StoreLock::new(store.clone());
    assert!(lock.acquire("order:1", Duration::from_secs(5)).await);

    FlakyStore::fail(&store.fail_eval, true);
    lock.release("order:1").await;

    // 锁留在存储中，等租期回收
    assert!(store.exists("lock:order:1").await.unwrap());
}
