use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pipecache::cache::{
    CacheKey, CacheRefreshJob, CacheRefreshManager, ParameterKey, RefreshJobError, RefreshOutcome,
    job_fn,
};
use tokio::sync::Notify;

fn key(id: &str) -> CacheKey {
    ParameterKey::new().with("id", id).into()
}

fn manager(pool: usize) -> CacheRefreshManager {
    CacheRefreshManager::new(NonZeroUsize::new(pool).unwrap()).expect("inside runtime")
}

/// Job that counts its runs and parks until released.
struct GatedJob {
    runs: AtomicUsize,
    gate: Notify,
}

impl GatedJob {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            gate: Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl CacheRefreshJob for GatedJob {
    async fn refresh(&self, _key: &CacheKey) -> Result<(), RefreshJobError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}

struct PanickingJob;

#[async_trait::async_trait]
impl CacheRefreshJob for PanickingJob {
    async fn refresh(&self, _key: &CacheKey) -> Result<(), RefreshJobError> {
        panic!("template exploded")
    }
}

#[tokio::test]
async fn concurrent_submissions_run_one_job() {
    let manager = manager(8);
    let job = GatedJob::new();

    let outcomes: Vec<_> = (0..10)
        .map(|_| manager.refresh(key("k"), job.clone()))
        .collect();

    let scheduled = outcomes.iter().filter(|o| o.is_scheduled()).count();
    assert_eq!(scheduled, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, RefreshOutcome::AlreadyPending))
            .count(),
        9
    );

    job.gate.notify_one();
    for outcome in outcomes {
        if let Some(handle) = outcome.into_handle() {
            assert!(handle.finished().await);
        }
    }
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    assert!(!manager.is_pending(&key("k")));

    // The key is free again once the first job is done.
    let again = manager.refresh(key("k"), job.clone());
    job.gate.notify_one();
    assert!(again.into_handle().unwrap().finished().await);
    assert_eq!(job.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_job_releases_its_key() {
    let manager = manager(2);
    let job = job_fn(|_key| async { Err(RefreshJobError::failed("upstream unavailable")) });

    let handle = manager.refresh(key("f"), job.clone()).into_handle().unwrap();
    assert!(handle.finished().await);
    assert!(!manager.is_pending(&key("f")));

    assert!(manager.refresh(key("f"), job).is_scheduled());
}

#[tokio::test]
async fn panicking_job_releases_its_key() {
    let manager = manager(2);
    let handle = manager
        .refresh(key("p"), Arc::new(PanickingJob))
        .into_handle()
        .unwrap();
    assert!(handle.finished().await, "panics are caught inside the task");
    assert!(!manager.is_pending(&key("p")));
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test]
async fn aborted_job_releases_its_key() {
    let manager = manager(2);
    let job = GatedJob::new();

    let handle = manager.refresh(key("a"), job.clone()).into_handle().unwrap();
    assert!(manager.is_pending(&key("a")));

    handle.abort();
    assert!(!handle.finished().await);
    assert!(!manager.is_pending(&key("a")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_size_bounds_concurrent_jobs() {
    let manager = manager(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let job = {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        job_fn(move |_key| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    let handles: Vec<_> = (0..8)
        .filter_map(|i| {
            manager
                .refresh(key(&i.to_string()), job.clone())
                .into_handle()
        })
        .collect();
    assert_eq!(handles.len(), 8);

    for handle in handles {
        assert!(handle.finished().await);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(manager.pending_count(), 0);
}
