use std::sync::Arc;

use bdd_core::LockKey;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

/// Exclusive lock bound to a single [`LockKey`].
pub type KeyLock = Arc<Mutex<()>>;

/// Process-wide registry of per-key exclusive locks.
///
/// Locks are created on first reference and never removed: the key space is
/// the backup types times the namespaces that ever sent a backup, plus one
/// key per document store, so it stays small for the daemon's lifetime.
///
/// Holding a lock is represented by an [`OwnedMutexGuard`]; dropping the
/// guard releases it, on every exit path.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, KeyLock>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it if this is the first reference.
    ///
    /// Concurrent first references to the same key observe the same lock:
    /// creation happens under the shard's write lock via the entry API.
    pub fn acquire_key(&self, key: &LockKey) -> KeyLock {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }

        let entry = self.locks.entry(key.clone()).or_insert_with(|| {
            debug!("Registered lock for {}", key);
            Arc::new(Mutex::new(()))
        });
        Arc::clone(entry.value())
    }

    /// Wait until the lock for `key` is held by the caller.
    #[instrument(skip(self, key), level = "debug", fields(key = %key))]
    pub async fn lock(&self, key: &LockKey) -> OwnedMutexGuard<()> {
        self.acquire_key(key).lock_owned().await
    }

    /// Number of keys that have been referenced so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bdd_core::BackupType;
    use tokio::sync::Barrier;

    #[test]
    fn test_same_key_same_lock() {
        let registry = LockRegistry::new();
        let key = LockKey::for_archive(BackupType::Postgres, None);

        let a = registry.acquire_key(&key);
        let b = registry.acquire_key(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_distinct_locks() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty());

        let a = registry.acquire_key(&LockKey::for_archive(BackupType::K8s, Some("team-a")));
        let b = registry.acquire_key(&LockKey::for_archive(BackupType::K8s, Some("team-b")));
        let c = registry.acquire_key(&LockKey::for_store("/srv/image-meta-db.json"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_creates_one_lock() {
        let registry = Arc::new(LockRegistry::new());
        let key = LockKey::for_archive(BackupType::Nextcloud, None);

        const NUM_TASKS: usize = 16;
        let barrier = Arc::new(Barrier::new(NUM_TASKS));
        let mut handles = vec![];

        for _ in 0..NUM_TASKS {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                registry.acquire_key(&key)
            }));
        }

        let mut locks = vec![];
        for handle in handles {
            locks.push(handle.await.expect("task panicked"));
        }

        assert!(locks.iter().all(|l| Arc::ptr_eq(l, &locks[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_is_exclusive_per_key() {
        let registry = Arc::new(LockRegistry::new());
        let key = LockKey::for_archive(BackupType::Git, None);

        const NUM_TASKS: usize = 8;
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..NUM_TASKS {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = registry.lock(&key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_releases() {
        let registry = LockRegistry::new();
        let key = LockKey::for_archive(BackupType::Postgres, None);

        let guard = registry.lock(&key).await;
        assert!(registry.acquire_key(&key).try_lock().is_err());
        drop(guard);
        assert!(registry.acquire_key(&key).try_lock().is_ok());
    }
}
