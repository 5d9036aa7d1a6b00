//! Optimistically updated in-memory mirrors of remote collections.
//!
//! Every write is applied to the local copy first and then sent to the remote
//! store. When the remote call fails the recorded inverse is applied, so once
//! a call settles the cache agrees with the store again.
//!
//! The caches do no per-record locking. Callers are expected to keep at most
//! one write in flight per record.

mod collection;
mod entity;
mod flat;
mod grouped;

pub use entity::{ChildEntity, Entity, EntityId, Filter, SortDirection, SortOrder};
pub use flat::EntityCache;
pub use grouped::GroupedCache;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// A panic while holding the lock cannot leave a half-applied write behind,
// every mutation is a single Vec operation, so poisoned state is still usable.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
