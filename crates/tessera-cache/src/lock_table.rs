//! Per-key async locks with delayed cleanup.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type KeyLock = Arc<Mutex<()>>;

struct Inner {
    locks: DashMap<String, KeyLock>,
    cleanup_delay: Duration,
}

/// Table of one mutex per cache key.
///
/// A key's entry is created on first use and removed some time after its
/// last lease is dropped, provided nobody holds or waits on it by then.
/// Cleanup compares the table's reference against outstanding handles, so it
/// never evicts a lock that is held or awaited.
#[derive(Clone)]
pub struct LockTable {
    inner: Arc<Inner>,
}

/// Outcome of [`LockTable::try_acquire`].
pub enum Acquisition {
    /// The caller now holds the key's lock.
    Acquired(LockLease),
    /// Another caller holds it.
    Contended(ContendedLock),
}

/// A lock another caller currently holds.
pub struct ContendedLock {
    table: LockTable,
    key: String,
    handle: KeyLock,
}

impl ContendedLock {
    /// Waits until the current holder releases the lock.
    pub async fn wait(self) -> LockLease {
        let guard = Arc::clone(&self.handle).lock_owned().await;
        LockLease {
            guard: Some(guard),
            table: self.table,
            key: self.key,
        }
    }
}

/// A held per-key lock. Dropping it releases the lock and schedules cleanup.
pub struct LockLease {
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
    key: String,
}

impl LockLease {
    /// The key this lease covers.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        // The guard holds a handle; release it first so cleanup can see an
        // idle entry.
        drop(self.guard.take());
        self.table.schedule_cleanup(std::mem::take(&mut self.key));
    }
}

impl LockTable {
    /// Creates a table whose idle entries are removed `cleanup_delay` after release.
    #[must_use]
    pub fn new(cleanup_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                locks: DashMap::new(),
                cleanup_delay,
            }),
        }
    }

    /// Returns the configured cleanup delay.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        self.inner.cleanup_delay
    }

    /// Tries to take the lock for `key` without waiting.
    pub fn try_acquire(&self, key: &str) -> Acquisition {
        let handle = self.handle(key);
        match Arc::clone(&handle).try_lock_owned() {
            Ok(guard) => Acquisition::Acquired(LockLease {
                guard: Some(guard),
                table: self.clone(),
                key: key.to_string(),
            }),
            Err(_) => Acquisition::Contended(ContendedLock {
                table: self.clone(),
                key: key.to_string(),
                handle,
            }),
        }
    }

    /// Waits for the lock for `key`.
    pub async fn acquire(&self, key: &str) -> LockLease {
        match self.try_acquire(key) {
            Acquisition::Acquired(lease) => lease,
            Acquisition::Contended(contended) => contended.wait().await,
        }
    }

    /// Number of keys with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.locks.is_empty()
    }

    /// Returns true if `key` has a lock entry.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.locks.contains_key(key)
    }

    /// Removes every idle entry immediately.
    pub fn prune_idle(&self) -> usize {
        let before = self.inner.locks.len();
        self.inner
            .locks
            .retain(|_, handle| Arc::strong_count(handle) > 1);
        before.saturating_sub(self.inner.locks.len())
    }

    fn handle(&self, key: &str) -> KeyLock {
        if let Some(existing) = self.inner.locks.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.inner
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn remove_if_idle(&self, key: &str) -> bool {
        self.inner
            .locks
            .remove_if(key, |_, handle| Arc::strong_count(handle) == 1)
            .is_some()
    }

    pub(crate) fn schedule_cleanup(&self, key: String) {
        let delay = self.inner.cleanup_delay;
        if delay.is_zero() {
            self.remove_if_idle(&key);
            return;
        }

        // Outside a runtime the entry stays until the next prune_idle().
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let table = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if table.remove_if_idle(&key) {
                trace!(key = %key, "Removed idle key lock");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_caller_is_contended() {
        let table = LockTable::new(Duration::from_secs(60));
        let first = match table.try_acquire("k") {
            Acquisition::Acquired(lease) => lease,
            Acquisition::Contended(_) => panic!("first caller should acquire"),
        };
        assert!(matches!(table.try_acquire("k"), Acquisition::Contended(_)));
        assert!(matches!(table.try_acquire("other"), Acquisition::Acquired(_)));
        drop(first);
        assert!(matches!(table.try_acquire("k"), Acquisition::Acquired(_)));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let table = LockTable::new(Duration::from_secs(60));
        let lease = table.acquire("k").await;

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.acquire("k").await.key().to_string() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        assert_eq!(waiter.await.unwrap(), "k");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entry_removed_after_delay() {
        let table = LockTable::new(Duration::from_secs(300));
        drop(table.acquire("k").await);
        assert!(table.contains("k"));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(!table.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_entry_survives_cleanup() {
        let table = LockTable::new(Duration::from_secs(1));
        drop(table.acquire("k").await);
        let held = table.acquire("k").await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(table.contains("k"));

        drop(held);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_zero_delay_removes_immediately() {
        let table = LockTable::new(Duration::ZERO);
        drop(table.acquire("k").await);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held() {
        let table = LockTable::new(Duration::from_secs(60));
        drop(table.acquire("idle").await);
        let _held = table.acquire("held").await;

        assert_eq!(table.prune_idle(), 1);
        assert!(table.contains("held"));
        assert!(!table.contains("idle"));
    }
}
