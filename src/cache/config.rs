//! Cache configuration.
//!
//! Selects the backing store and sizes the refresh worker pool via `pipecache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_NAME: &str = "default";
const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_REFRESH_POOL_SIZE: usize = 50;

/// Backing store flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Capacity-bounded, least recently used entries go first.
    #[default]
    Lru,
    /// Recent entries held strongly, older ones only while a caller still holds them.
    Weak,
}

/// Cache configuration from `pipecache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name used in logs and metric labels.
    pub name: String,
    pub store: StoreKind,
    /// Maximum entries held by the LRU store, or held strongly by the weak store.
    pub capacity: usize,
    /// Maximum refresh jobs running at once.
    pub refresh_pool_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            store: StoreKind::default(),
            capacity: DEFAULT_CAPACITY,
            refresh_pool_size: DEFAULT_REFRESH_POOL_SIZE,
        }
    }
}

impl CacheConfig {
    /// Returns the LRU capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the refresh pool size as NonZeroUsize, clamping to 1 if zero.
    pub fn refresh_pool_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.refresh_pool_size).unwrap_or(NonZeroUsize::MIN)
    }
}
