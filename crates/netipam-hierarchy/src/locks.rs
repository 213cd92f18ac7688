use dashmap::DashMap;
use netipam_core::types::ScopeKey;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per key, created on first use.
///
/// Holders of a key's lock are the only writers allocating within, or
/// rebuilding the hierarchy of, that scope. Locking several keys always
/// happens in sorted order.
pub struct ScopeLocks<K = ScopeKey> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for ScopeLocks<K>
where
    K: Eq + Hash + Ord + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ScopeLocks<K>
where
    K: Eq + Hash + Ord + Copy,
{
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn handle(&self, key: K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock of every key in `keys`.
    pub fn with<T>(&self, keys: &[K], f: impl FnOnce() -> T) -> T {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let handles: Vec<Arc<Mutex<()>>> = keys.iter().map(|k| self.handle(*k)).collect();
        let _guards: Vec<MutexGuard<'_, ()>> = handles
            .iter()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        f()
    }

    /// Number of keys that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
