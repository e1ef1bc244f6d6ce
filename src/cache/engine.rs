//! Validity-aware cache front end.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use super::config::{CacheConfig, StoreKind};
use super::keys::CacheKey;
use super::metrics::METRIC_LOOKUP_TOTAL;
use super::store::{CacheStore, LruStore, WeakStore};
use super::value::CacheValue;

/// A named cache over a pluggable [`CacheStore`].
///
/// [`get`](Self::get) only returns values whose producing key is valid for the
/// lookup key. [`get_including_invalid`](Self::get_including_invalid) skips that
/// check so a stale value can be served while a refresh runs.
pub struct Cache {
    name: String,
    store: Box<dyn CacheStore>,
}

impl Cache {
    pub fn new(name: impl Into<String>, store: impl CacheStore + 'static) -> Self {
        Self {
            name: name.into(),
            store: Box::new(store),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        match config.store {
            StoreKind::Lru => Self::new(&config.name, LruStore::new(config.capacity_non_zero())),
            StoreKind::Weak => {
                Self::new(&config.name, WeakStore::new(config.capacity_non_zero()))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored value for `key`, if present and still valid for it.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        self.lookup(key, false)
    }

    /// Stored value for `key` regardless of validity.
    pub fn get_including_invalid(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        self.lookup(key, true)
    }

    /// Stored value for `key` without validity checks, metrics, or recency updates.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        self.store.peek(key)
    }

    fn lookup(&self, key: &CacheKey, include_invalid: bool) -> Option<Arc<CacheValue>> {
        let Some(value) = self.store.retrieve(key) else {
            self.record(key, "miss");
            return None;
        };

        if value.is_valid(key) {
            self.record(key, "hit");
            Some(value)
        } else if include_invalid {
            self.record(key, "stale");
            Some(value)
        } else {
            self.record(key, "invalid");
            None
        }
    }

    fn record(&self, key: &CacheKey, outcome: &'static str) {
        counter!(METRIC_LOOKUP_TOTAL, "cache" => self.name.clone(), "outcome" => outcome)
            .increment(1);
        debug!(
            cache = %self.name,
            fingerprint = key.fingerprint(),
            outcome,
            "Cache lookup"
        );
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn put(&self, key: CacheKey, value: impl Into<Arc<CacheValue>>) {
        debug!(cache = %self.name, fingerprint = key.fingerprint(), "Cache put");
        self.store.store(key, value.into());
    }

    /// Remove the entry for `key`, returning it if one was present.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<CacheValue>> {
        self.store.remove(key)
    }

    pub fn clear(&self) {
        debug!(cache = %self.name, "Cache cleared");
        self.store.clear();
    }

    /// Snapshot of the stored keys; later mutations do not affect it.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
