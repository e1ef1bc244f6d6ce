//! Poison-tolerant access to the locks guarding cache state.
//!
//! A panic on one thread while it holds a cache lock must not turn every later
//! lookup into a panic too. The guard is recovered and the event logged.

use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    module: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            module,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock, state may be stale"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn read<'a, T>(
    lock: &'a RwLock<T>,
    module: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), module, op, "rwlock.read")
}

pub(crate) fn write<'a, T>(
    lock: &'a RwLock<T>,
    module: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), module, op, "rwlock.write")
}
