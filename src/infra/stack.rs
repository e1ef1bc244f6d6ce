//! Wiring of the cache components from resolved settings.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    Cache, CacheBurstActions, CacheMonitor, CacheRefreshManager, StaleWhileRevalidate,
};
use crate::config::Settings;

use super::error::InfraError;

/// One cache with its refresh manager and maintenance surfaces.
///
/// Must be built inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct CacheStack {
    pub cache: Arc<Cache>,
    pub refresher: Arc<CacheRefreshManager>,
}

impl CacheStack {
    pub fn from_settings(settings: &Settings) -> Result<Self, InfraError> {
        let cache = Arc::new(Cache::from_config(&settings.cache));
        let refresher = Arc::new(CacheRefreshManager::from_config(&settings.cache)?);

        info!(
            cache = %settings.cache.name,
            store = ?settings.cache.store,
            capacity = settings.cache.capacity,
            refresh_pool_size = refresher.pool_size(),
            "Cache stack ready"
        );

        Ok(Self { cache, refresher })
    }

    /// Load settings, install telemetry and wire the stack.
    pub fn bootstrap(config_file: Option<&std::path::Path>) -> Result<Self, InfraError> {
        let settings = crate::config::load(config_file)?;
        super::telemetry::init(&settings.logging)?;
        Self::from_settings(&settings)
    }

    pub fn revalidate(&self) -> StaleWhileRevalidate {
        StaleWhileRevalidate::new(Arc::clone(&self.cache), Arc::clone(&self.refresher))
    }

    pub fn monitor(&self) -> CacheMonitor {
        CacheMonitor::new(Arc::clone(&self.cache))
    }

    pub fn burst(&self) -> CacheBurstActions {
        CacheBurstActions::new([Arc::clone(&self.cache)])
    }
}
