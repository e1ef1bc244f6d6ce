//! Serve stale values while a background refresh recomputes them.

use std::sync::Arc;

use super::engine::Cache;
use super::keys::CacheKey;
use super::refresh::{CacheRefreshJob, CacheRefreshManager, RefreshOutcome};
use super::value::CacheValue;

#[derive(Debug)]
pub enum Lookup {
    Fresh(Arc<CacheValue>),
    /// Present but no longer valid; `refresh` tells whether a job was submitted.
    Stale {
        value: Arc<CacheValue>,
        refresh: RefreshOutcome,
    },
    Miss,
}

impl Lookup {
    /// The value to serve, fresh or stale.
    pub fn value(&self) -> Option<&Arc<CacheValue>> {
        match self {
            Self::Fresh(value) | Self::Stale { value, .. } => Some(value),
            Self::Miss => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Pairs a cache with a refresh manager.
///
/// A miss is left to the caller, who usually computes synchronously and puts
/// the result.
#[derive(Debug, Clone)]
pub struct StaleWhileRevalidate {
    cache: Arc<Cache>,
    refresher: Arc<CacheRefreshManager>,
}

impl StaleWhileRevalidate {
    pub fn new(cache: Arc<Cache>, refresher: Arc<CacheRefreshManager>) -> Self {
        Self { cache, refresher }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn refresher(&self) -> &Arc<CacheRefreshManager> {
        &self.refresher
    }

    pub fn lookup(&self, key: &CacheKey, job: Arc<dyn CacheRefreshJob>) -> Lookup {
        if let Some(value) = self.cache.get(key) {
            return Lookup::Fresh(value);
        }

        match self.cache.get_including_invalid(key) {
            Some(value) => Lookup::Stale {
                value,
                refresh: self.refresher.refresh(key.clone(), job),
            },
            None => Lookup::Miss,
        }
    }
}
