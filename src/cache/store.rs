//! Backing stores.
//!
//! A store maps keys to values by equality only. Validity is decided above it,
//! in [`Cache`](super::Cache), so swapping stores never changes what a lookup
//! may return.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock, Weak};

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::keys::CacheKey;
use super::lock;
use super::metrics::METRIC_STORE_EVICT_TOTAL;
use super::value::CacheValue;

const SOURCE: &str = "cache::store";

/// Key/value storage behind a [`Cache`](super::Cache).
pub trait CacheStore: Send + Sync {
    fn retrieve(&self, key: &CacheKey) -> Option<Arc<CacheValue>>;

    /// Like [`retrieve`](Self::retrieve) without touching recency, for maintenance reads.
    fn peek(&self, key: &CacheKey) -> Option<Arc<CacheValue>>;

    fn store(&self, key: CacheKey, value: Arc<CacheValue>);

    fn remove(&self, key: &CacheKey) -> Option<Arc<CacheValue>>;

    fn clear(&self);

    /// Snapshot of the keys currently retrievable.
    fn keys(&self) -> Vec<CacheKey>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Weak store
// ============================================================================

/// Holds the most recently used entries strongly and every other entry weakly.
///
/// An entry that falls out of the retained set stays retrievable for as long
/// as some caller still holds its value, and is pruned on the next write once
/// nobody does.
pub struct WeakStore {
    entries: RwLock<WeakEntries>,
}

struct WeakEntries {
    retained: LruCache<CacheKey, Arc<CacheValue>>,
    handles: HashMap<CacheKey, Weak<CacheValue>>,
}

impl WeakEntries {
    fn upgrade(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        self.handles.get(key).and_then(Weak::upgrade)
    }

    fn hold(&mut self, key: CacheKey, value: Arc<CacheValue>) {
        self.retained.pop(&key);
        if let Some((released, _)) = self.retained.push(key, value) {
            debug!(
                released = %released,
                fingerprint = released.fingerprint(),
                "Released strong hold on weak cache entry"
            );
        }
    }
}

impl WeakStore {
    /// `retained` bounds how many entries are held strongly.
    pub fn new(retained: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(WeakEntries {
                retained: LruCache::new(retained),
                handles: HashMap::new(),
            }),
        }
    }
}

impl CacheStore for WeakStore {
    fn retrieve(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        let mut entries = lock::write(&self.entries, SOURCE, "weak_retrieve");
        if let Some(value) = entries.retained.get(key) {
            return Some(Arc::clone(value));
        }
        // Still alive elsewhere: take it back into the retained set.
        let value = entries.upgrade(key)?;
        let slot = entries
            .handles
            .get_key_value(key)
            .map(|(slot, _)| slot.clone())?;
        entries.hold(slot, Arc::clone(&value));
        Some(value)
    }

    fn peek(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        lock::read(&self.entries, SOURCE, "weak_peek").upgrade(key)
    }

    fn store(&self, key: CacheKey, value: Arc<CacheValue>) {
        let mut entries = lock::write(&self.entries, SOURCE, "weak_store");
        let before = entries.handles.len();
        entries.handles.retain(|_, held| held.strong_count() > 0);
        let pruned = before - entries.handles.len();
        if pruned > 0 {
            debug!(pruned, "Pruned collected weak cache entries");
        }
        // Replace the key too: equal keys may still differ in validity data.
        entries.handles.remove(&key);
        entries.handles.insert(key.clone(), Arc::downgrade(&value));
        entries.hold(key, value);
    }

    fn remove(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        let mut entries = lock::write(&self.entries, SOURCE, "weak_remove");
        let retained = entries.retained.pop(key);
        let handle = entries.handles.remove(key);
        retained.or_else(|| handle.and_then(|held| held.upgrade()))
    }

    fn clear(&self) {
        let mut entries = lock::write(&self.entries, SOURCE, "weak_clear");
        entries.retained.clear();
        entries.handles.clear();
    }

    fn keys(&self) -> Vec<CacheKey> {
        lock::read(&self.entries, SOURCE, "weak_keys")
            .handles
            .iter()
            .filter(|(_, held)| held.strong_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn len(&self) -> usize {
        lock::read(&self.entries, SOURCE, "weak_len")
            .handles
            .values()
            .filter(|held| held.strong_count() > 0)
            .count()
    }
}

// ============================================================================
// LRU store
// ============================================================================

/// Holds values strongly, evicting the least recently used entry at capacity.
pub struct LruStore {
    entries: RwLock<LruCache<CacheKey, Arc<CacheValue>>>,
}

impl LruStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        lock::read(&self.entries, SOURCE, "lru_capacity")
            .cap()
            .get()
    }
}

impl CacheStore for LruStore {
    fn retrieve(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        // `get` promotes the entry, so even reads take the write lock.
        lock::write(&self.entries, SOURCE, "lru_retrieve")
            .get(key)
            .cloned()
    }

    fn peek(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        lock::read(&self.entries, SOURCE, "lru_peek")
            .peek(key)
            .cloned()
    }

    fn store(&self, key: CacheKey, value: Arc<CacheValue>) {
        let mut entries = lock::write(&self.entries, SOURCE, "lru_store");
        // `push` keeps the old key on overwrite; equal keys may still differ in validity data.
        entries.pop(&key);
        if let Some((evicted_key, _)) = entries.push(key, value) {
            counter!(METRIC_STORE_EVICT_TOTAL).increment(1);
            debug!(
                evicted = %evicted_key,
                fingerprint = evicted_key.fingerprint(),
                "Evicted least recently used cache entry"
            );
        }
    }

    fn remove(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        lock::write(&self.entries, SOURCE, "lru_remove").pop(key)
    }

    fn clear(&self) {
        lock::write(&self.entries, SOURCE, "lru_clear").clear();
    }

    fn keys(&self) -> Vec<CacheKey> {
        lock::read(&self.entries, SOURCE, "lru_keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn len(&self) -> usize {
        lock::read(&self.entries, SOURCE, "lru_len").len()
    }
}
