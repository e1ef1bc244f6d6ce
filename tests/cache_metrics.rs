use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use pipecache::cache::{
    Cache, CacheConfig, CacheKey, CacheRefreshManager, CacheValue, InvalidKey, ParameterKey,
    RefreshJobError, job_fn,
};

fn key(id: &str) -> CacheKey {
    ParameterKey::new().with("id", id).into()
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    pipecache::infra::telemetry::describe_metrics();

    // Lookups: miss, hit, invalid, stale, then an LRU eviction.
    let cache = Cache::from_config(&CacheConfig {
        capacity: 2,
        ..Default::default()
    });
    assert!(cache.get(&key("1")).is_none());
    cache.put(key("1"), CacheValue::bytes("one", key("1")));
    assert!(cache.get(&key("1")).is_some());

    let marker: CacheKey = InvalidKey::new("live").unwrap().into();
    cache.put(marker.clone(), CacheValue::bytes("live", marker.clone()));
    assert!(cache.get(&marker).is_none());
    assert!(cache.get_including_invalid(&marker).is_some());
    cache.put(key("3"), CacheValue::bytes("three", key("3")));

    // Refresh: scheduled, deduplicated, failed.
    let refresher = CacheRefreshManager::new(NonZeroUsize::new(1).unwrap()).expect("runtime");
    let job = job_fn(|_key| async { Err(RefreshJobError::failed("boom")) });
    let handle = refresher
        .refresh(key("r"), Arc::clone(&job))
        .into_handle()
        .expect("scheduled");
    assert!(!refresher.refresh(key("r"), job).is_scheduled());
    assert!(handle.finished().await);

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "pipecache_lookup_total",
        "pipecache_store_evict_total",
        "pipecache_refresh_total",
        "pipecache_refresh_pending",
        "pipecache_refresh_ms",
    ] {
        assert!(names.contains(expected), "missing metric {expected}");
    }

    let lookup_outcomes: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "pipecache_lookup_total")
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "outcome")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    for outcome in ["hit", "miss", "invalid", "stale"] {
        assert!(lookup_outcomes.contains(outcome), "missing outcome {outcome}");
    }
}
