//! Metric names emitted by the cache layer.

pub const METRIC_LOOKUP_TOTAL: &str = "pipecache_lookup_total";
pub const METRIC_STORE_EVICT_TOTAL: &str = "pipecache_store_evict_total";
pub const METRIC_REFRESH_TOTAL: &str = "pipecache_refresh_total";
pub const METRIC_REFRESH_PENDING: &str = "pipecache_refresh_pending";
pub const METRIC_REFRESH_MS: &str = "pipecache_refresh_ms";
