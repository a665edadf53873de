//! Thread-local reuse cache
//!
//! Each thread remembers the last slot it claimed from each pool. A
//! repeat claim on the same thread can then CAS that slot directly
//! from LIVING to TLR_CLAIMED without touching the live channel, which
//! makes single-threaded claim/release loops run essentially
//! uncontended.
//!
//! The cache is keyed by pool id and stores weak, type-erased slot
//! references, so a dropped pool cannot be kept alive (or have its
//! memory pinned) by threads that once used it. Entries for dead pools
//! are pruned lazily: on the miss that discovers them, or when the map
//! grows past a small bound on insert. There is no way to enumerate
//! other threads' caches, so eager cleanup is not possible.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Prune dead entries once the map reaches this size. Real programs
/// hold a handful of pools; this only guards against churn.
const PRUNE_THRESHOLD: usize = 16;

thread_local! {
    static CACHE: RefCell<HashMap<u64, Weak<dyn Any + Send + Sync>>> =
        RefCell::new(HashMap::new());
}

/// Fetch this thread's cached slot for the given pool, if it is still
/// alive. A stale entry (its pool died) is removed on the way out.
pub(crate) fn get<S: Any + Send + Sync>(pool_id: u64) -> Option<Arc<S>> {
    CACHE.with(|cache| {
        let mut map = cache.borrow_mut();
        match map.get(&pool_id).map(Weak::upgrade) {
            Some(Some(erased)) => erased.downcast::<S>().ok(),
            Some(None) => {
                map.remove(&pool_id);
                None
            }
            None => None,
        }
    })
}

/// Remember `slot` as this thread's reuse candidate for the pool.
pub(crate) fn put<S: Any + Send + Sync>(pool_id: u64, slot: &Arc<S>) {
    let erased: Arc<dyn Any + Send + Sync> = slot.clone();
    CACHE.with(|cache| {
        let mut map = cache.borrow_mut();
        if map.len() >= PRUNE_THRESHOLD {
            map.retain(|_, weak| weak.strong_count() > 0);
        }
        map.insert(pool_id, Arc::downgrade(&erased));
    });
}

/// Drop the cached entry for the pool if it currently points at
/// `slot`. Used when a claim surfaces poison, so the fast path does
/// not keep steering this thread back to a dead slot.
pub(crate) fn clear_if<S: Any + Send + Sync>(pool_id: u64, slot: &Arc<S>) {
    CACHE.with(|cache| {
        let mut map = cache.borrow_mut();
        if let Some(weak) = map.get(&pool_id)
            && let Some(current) = weak.upgrade()
            && std::ptr::eq(Arc::as_ptr(&current) as *const (), Arc::as_ptr(slot) as *const ())
        {
            map.remove(&pool_id);
        }
    });
}
