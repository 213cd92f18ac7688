use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use uuid::Uuid;

/// Which record a cached figure belongs to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum UtilizationKey {
    Aggregate(Uuid),
    Prefix(Uuid),
    IpRange(Uuid),
    VlanGroup(Uuid),
}

/// Thread-safe cache of computed utilization percentages.
///
/// Any write to address space can change any figure (global containers and
/// aggregates span VRFs), so writers clear the whole cache rather than
/// tracking dependencies. Each clear bumps a generation so a figure computed
/// from a snapshot taken before the clear is never stored after it.
pub struct UtilizationCache {
    entries: DashMap<UtilizationKey, f64>,
    generation: AtomicU64,
    max_size: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl UtilizationCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(max_size.min(4096)),
            generation: AtomicU64::new(0),
            max_size,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &UtilizationKey) -> Option<f64> {
        match self.entries.get(key) {
            Some(e) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(*e)
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a figure; silently skipped once the cache is full.
    pub fn insert(&self, key: UtilizationKey, value: f64) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            return;
        }
        self.entries.insert(key, value);
    }

    /// Cached value for `key`, computing and storing it on a miss.
    ///
    /// The computed value is returned but not stored if the cache was
    /// invalidated while `compute` ran.
    pub fn get_or_try_insert<E>(
        &self,
        key: UtilizationKey,
        compute: impl FnOnce() -> Result<f64, E>,
    ) -> Result<f64, E> {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let generation = self.generation.load(Ordering::Acquire);
        let value = compute()?;
        self.insert_if_current(key, value, generation);
        Ok(value)
    }

    fn insert_if_current(&self, key: UtilizationKey, value: f64, generation: u64) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            return;
        }
        // the shard lock orders this check against a concurrent clear
        if let dashmap::mapref::entry::Entry::Vacant(slot) = self.entries.entry(key) {
            if self.generation.load(Ordering::Acquire) == generation {
                slot.insert(value);
            }
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> usize {
        self.miss_count.load(Ordering::Relaxed)
    }
}
