//! Cache keys with validity semantics, validity-aware caches and deduplicated
//! background refresh for content pipelines.

pub mod cache;
pub mod config;
pub mod infra;
pub mod util;
