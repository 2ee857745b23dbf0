//! Keyed async locks
//!
//! Serialises work per key (thread id, customer id) while unrelated keys proceed in
//! parallel. Entries are pruned once nobody holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Guard for one key; releases (and prunes) on drop
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    owner: Arc<KeyedLocks<K>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(self: &Arc<Self>, key: K) -> KeyedGuard<K> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            owner: Arc::clone(self),
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        // Release the async mutex before inspecting reference counts
        self.guard.take();

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mutex) = locks.get(&self.key) {
            // Only the map itself still references it: nobody holds or waits
            if Arc::strong_count(mutex) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialised() {
        let locks = KeyedLocks::<u32>::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(7).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<u32>::new();
        let _a = locks.lock(1).await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
