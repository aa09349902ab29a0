//! A lazily-populated registry of per-key async locks.
//!
//! Both the per-volume lock (held while a publish/unpublish/reconcile
//! sequence suspends on backend or orchestrator calls) and the
//! per-VM lock used by the VMI grouper need this shape: an
//! `Arc<tokio::sync::Mutex<()>>` per key, created on first use and kept
//! around for the process lifetime, guarded by a fast synchronous map
//! the way the service registry in this codebase guards its endpoint
//! map.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of named async mutexes, one per key, created on demand.
pub struct KeyedLockRegistry<K> {
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }
        Arc::clone(
            self.locks
                .write()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Acquires the lock for `key`, creating it if this is the first
    /// request for it. The returned guard may be held across `.await`
    /// points.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }

    /// The number of distinct keys this registry has ever created a
    /// lock for. Entries are never removed: a simple always-growing
    /// map beats a reference-counted eviction scheme for a bounded
    /// key space (volume and VM counts are both bounded by cluster
    /// size).
    #[must_use]
    pub fn known_keys(&self) -> usize {
        self.locks.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let registry: KeyedLockRegistry<String> = KeyedLockRegistry::new();
        let a = registry.lock(&"vol-a".to_string()).await;
        let b = registry.lock(&"vol-b".to_string()).await;
        drop(a);
        drop(b);
        assert_eq!(registry.known_keys(), 2);
    }

    #[tokio::test]
    async fn same_key_serializes_acquisition() {
        let registry: Arc<KeyedLockRegistry<String>> = Arc::new(KeyedLockRegistry::new());
        let key = "vol-a".to_string();

        let guard = registry.lock(&key).await;
        let registry2 = Arc::clone(&registry);
        let key2 = key.clone();
        let handle = tokio::spawn(async move {
            let _guard = registry2.lock(&key2).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(guard);
        handle.await.expect("task completes once the lock is released");
    }
}
