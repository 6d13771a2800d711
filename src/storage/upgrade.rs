//! Optimistic-read / exclusive-write upgrade over a single reader/writer lock.
//!
//! Probe under the shared lock; on a miss release it, take the exclusive lock
//! and probe again, because another caller may have populated the state
//! between the two acquisitions. Only a miss under the exclusive lock may
//! populate.

use std::ops::Deref;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The lock, held in whichever mode the probe ended in.
pub(crate) enum Held<'a, T> {
    Shared(RwLockReadGuard<'a, T>),
    Exclusive(RwLockWriteGuard<'a, T>),
}

impl<T> Deref for Held<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Shared(guard) => guard,
            Self::Exclusive(guard) => guard,
        }
    }
}

/// Outcome of [`probe`].
pub(crate) enum Probe<'a, T, R> {
    /// Found under the shared lock or by the re-probe under the exclusive lock.
    Found(Held<'a, T>, R),
    /// Still absent under the exclusive lock; the caller populates.
    Vacant(RwLockWriteGuard<'a, T>),
}

/// Runs `find` under the shared lock, upgrading and re-running it on a miss.
pub(crate) async fn probe<'a, T, R, F>(lock: &'a RwLock<T>, find: F) -> Probe<'a, T, R>
where
    F: Fn(&T) -> Option<R>,
{
    let shared = lock.read().await;
    if let Some(found) = find(&shared) {
        return Probe::Found(Held::Shared(shared), found);
    }
    drop(shared);

    let exclusive = lock.write().await;
    match find(&exclusive) {
        Some(found) => Probe::Found(Held::Exclusive(exclusive), found),
        None => Probe::Vacant(exclusive),
    }
}

/// Like [`probe`], running `populate` under the exclusive lock when the state
/// is still absent. The lock stays held so the caller can act on the result.
pub(crate) async fn probe_or_populate<'a, T, R, F, P>(
    lock: &'a RwLock<T>,
    find: F,
    populate: P,
) -> (Held<'a, T>, R)
where
    F: Fn(&T) -> Option<R>,
    P: FnOnce(&mut T) -> R,
{
    match probe(lock, find).await {
        Probe::Found(held, found) => (held, found),
        Probe::Vacant(mut exclusive) => {
            let populated = populate(&mut exclusive);
            (Held::Exclusive(exclusive), populated)
        }
    }
}
