//! Deduplicated background refresh of stale entries.
//!
//! At most one refresh runs per key. The pending entry is owned by a guard
//! that moves into the spawned task, so the key is released on every way the
//! task can end: success, error, panic, abort, or runtime shutdown.

use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::metrics::{METRIC_REFRESH_MS, METRIC_REFRESH_PENDING, METRIC_REFRESH_TOTAL};

/// Failure reported by a refresh job. Logged, never propagated.
#[derive(Debug, Error)]
pub enum RefreshJobError {
    #[error("{0}")]
    Failed(String),
    #[error("{message}: {source}")]
    Source {
        message: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl RefreshJobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Source {
            message: message.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh manager requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Recomputes the artifact for a key, typically ending with `Cache::put`.
#[async_trait]
pub trait CacheRefreshJob: Send + Sync {
    async fn refresh(&self, key: &CacheKey) -> Result<(), RefreshJobError>;
}

/// Adapts an async closure into a [`CacheRefreshJob`].
pub struct FnRefreshJob<F>(F);

pub fn job_fn<F, Fut>(job: F) -> Arc<dyn CacheRefreshJob>
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RefreshJobError>> + Send + 'static,
{
    Arc::new(FnRefreshJob(job))
}

#[async_trait]
impl<F, Fut> CacheRefreshJob for FnRefreshJob<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RefreshJobError>> + Send + 'static,
{
    async fn refresh(&self, key: &CacheKey) -> Result<(), RefreshJobError> {
        (self.0)(key.clone()).await
    }
}

/// Result of a refresh submission.
#[derive(Debug)]
pub enum RefreshOutcome {
    Scheduled(RefreshHandle),
    /// A refresh for an equal key is already in flight; nothing was submitted.
    AlreadyPending,
}

impl RefreshOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }

    pub fn into_handle(self) -> Option<RefreshHandle> {
        match self {
            Self::Scheduled(handle) => Some(handle),
            Self::AlreadyPending => None,
        }
    }
}

/// Handle to a scheduled refresh. Dropping it detaches the task.
#[derive(Debug)]
pub struct RefreshHandle {
    id: Uuid,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the refresh. The key is released once the task is dropped.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task. `true` if the job ran to an end, `false` if it was cancelled.
    pub async fn finished(self) -> bool {
        self.task.await.is_ok()
    }
}

/// Runs refresh jobs on a bounded pool, one per key at a time.
pub struct CacheRefreshManager {
    pending: Arc<DashMap<CacheKey, Uuid>>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    runtime: Handle,
}

impl CacheRefreshManager {
    /// Create a manager bound to the current tokio runtime.
    pub fn new(pool_size: NonZeroUsize) -> Result<Self, RefreshError> {
        Ok(Self::with_handle(pool_size, Handle::try_current()?))
    }

    pub fn with_handle(pool_size: NonZeroUsize, runtime: Handle) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(pool_size.get())),
            pool_size: pool_size.get(),
            runtime,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, RefreshError> {
        Self::new(config.refresh_pool_size_non_zero())
    }

    /// Submit a refresh for `key` unless one is already in flight.
    ///
    /// Returns without waiting for the job or for a free worker.
    #[instrument(skip_all, fields(fingerprint = key.fingerprint()))]
    pub fn refresh(&self, key: CacheKey, job: Arc<dyn CacheRefreshJob>) -> RefreshOutcome {
        let id = Uuid::new_v4();
        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                counter!(METRIC_REFRESH_TOTAL, "outcome" => "deduplicated").increment(1);
                debug!(key = %key, "Refresh already pending");
                return RefreshOutcome::AlreadyPending;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(id);
            }
        }

        let guard = PendingGuard {
            key: key.clone(),
            id,
            pending: Arc::clone(&self.pending),
        };
        gauge!(METRIC_REFRESH_PENDING).set(self.pending.len() as f64);
        counter!(METRIC_REFRESH_TOTAL, "outcome" => "scheduled").increment(1);
        debug!(key = %key, refresh_id = %id, "Refresh scheduled");

        let permits = Arc::clone(&self.permits);
        let task = self.runtime.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(refresh_id = %id, "Refresh pool closed, job skipped");
                return;
            };
            run_job(id, &key, job.as_ref()).await;
        });

        RefreshOutcome::Scheduled(RefreshHandle { id, task })
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl std::fmt::Debug for CacheRefreshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRefreshManager")
            .field("pool_size", &self.pool_size)
            .field("pending", &self.pending.len())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

async fn run_job(id: Uuid, key: &CacheKey, job: &dyn CacheRefreshJob) {
    let started_at = Instant::now();
    let result = AssertUnwindSafe(job.refresh(key)).catch_unwind().await;
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

    let outcome = match result {
        Ok(Ok(())) => {
            debug!(refresh_id = %id, key = %key, elapsed_ms, "Refresh completed");
            "ok"
        }
        Ok(Err(err)) => {
            warn!(
                refresh_id = %id,
                key = %key,
                error = %err,
                elapsed_ms,
                "Refresh job failed"
            );
            "failed"
        }
        Err(panic) => {
            error!(
                refresh_id = %id,
                key = %key,
                panic_msg = %panic_message(&*panic),
                elapsed_ms,
                "Refresh job panicked"
            );
            "panicked"
        }
    };

    counter!(METRIC_REFRESH_TOTAL, "outcome" => outcome).increment(1);
    histogram!(METRIC_REFRESH_MS, "outcome" => outcome).record(elapsed_ms);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct PendingGuard {
    key: CacheKey,
    id: Uuid,
    pending: Arc<DashMap<CacheKey, Uuid>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove_if(&self.key, |_, owner| *owner == self.id);
        gauge!(METRIC_REFRESH_PENDING).set(self.pending.len() as f64);
    }
}
