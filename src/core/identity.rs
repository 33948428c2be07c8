//! Per-identity mutual exclusion across concurrent job runners.
//!
//! Two jobs for the same customer identity must never drive portal sessions at the
//! same time. Each identity gets a lazily created async mutex; the guard is owned so
//! a runner can hold it across `.await` points for its whole pass.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-identity async locks.
#[derive(Debug, Default)]
pub struct IdentityMutex {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for as long as the identity is busy.
#[derive(Debug)]
pub struct IdentityGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl IdentityGuard {
    /// Identity this guard excludes.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl IdentityMutex {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Wait until `key` is free and take it.
    pub async fn lock(&self, key: &str) -> IdentityGuard {
        let lock = self.entry(key);
        IdentityGuard {
            key: key.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Take `key` only if nobody holds it.
    #[must_use]
    pub fn try_lock(&self, key: &str) -> Option<IdentityGuard> {
        let lock = self.entry(key);
        lock.try_lock_owned().ok().map(|guard| IdentityGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Number of identities with a registered lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no identity has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_identity_is_exclusive() {
        let mutex = IdentityMutex::new();
        let held = mutex.try_lock("ABC").unwrap();
        assert_eq!(held.key(), "ABC");
        assert!(mutex.try_lock("ABC").is_none());
        assert!(mutex.try_lock("XYZ").is_some());
        drop(held);
        assert!(mutex.try_lock("ABC").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn holders_of_one_identity_never_overlap() {
        let mutex = Arc::new(IdentityMutex::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let mutex = Arc::clone(&mutex);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock("SAME").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(mutex.len(), 1);
    }
}
