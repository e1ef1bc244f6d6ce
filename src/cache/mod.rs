//! Pipecache core.
//!
//! - **Keys**: identify an artifact and decide whether a stored value may be
//!   reused for a later lookup
//! - **Cache**: validity-aware front end over a pluggable store
//! - **Refresh**: deduplicated background recomputation on a bounded pool
//! - **Maintenance**: per-cache monitor and filtered bulk operations
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `pipecache.toml`:
//!
//! ```toml
//! [cache]
//! name = "fragments"
//! store = "lru"          # or "weak"
//! capacity = 1024
//! refresh_pool_size = 50
//! ```

mod burst;
mod config;
mod engine;
mod keys;
mod lock;
pub mod metrics;
mod monitor;
mod refresh;
mod revalidate;
mod store;
mod value;

pub use burst::{BurstError, BurstFilter, BurstReport, CacheBurstActions, LIST_LIMIT, parse_age};
pub use config::{CacheConfig, StoreKind};
pub use engine::Cache;
pub use keys::{
    CacheKey, CompoundKey, ExpiresKey, InvalidKey, KeyError, ParameterKey, TimestampKey,
};
pub use monitor::{CacheMonitor, EntryView};
pub use refresh::{
    CacheRefreshJob, CacheRefreshManager, FnRefreshJob, RefreshError, RefreshHandle,
    RefreshJobError, RefreshOutcome, job_fn,
};
pub use revalidate::{Lookup, StaleWhileRevalidate};
pub use store::{CacheStore, LruStore, WeakStore};
pub use value::{CacheValue, ValueError, ValueKind};
