// Copyright © 2024 Pathway

//! Per-worker cache for data that operators want to reuse across partitions
//! processed by the same worker thread. Nothing here is visible to other workers.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use arcstr::ArcStr;
use log::debug;

type CachedValue = Arc<dyn Any + Send + Sync>;

thread_local! {
    static WORKER_CACHE: RefCell<HashMap<ArcStr, CachedValue>> = RefCell::new(HashMap::new());
}

/// Returns the value cached under `key` on this worker, computing it with `init` when
/// absent. A value of a different type cached under the same key is replaced.
pub fn get_or_insert_with<T, F>(key: &str, init: F) -> Arc<T>
where
    T: Any + Send + Sync,
    F: FnOnce() -> T,
{
    let cached = WORKER_CACHE.with(|cache| cache.borrow().get(key).cloned());
    if let Some(value) = cached.and_then(|value| value.downcast::<T>().ok()) {
        return value;
    }
    let value = Arc::new(init());
    WORKER_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .insert(ArcStr::from(key), value.clone() as CachedValue);
    });
    value
}

pub fn contains(key: &str) -> bool {
    WORKER_CACHE.with(|cache| cache.borrow().contains_key(key))
}

pub fn len() -> usize {
    WORKER_CACHE.with(|cache| cache.borrow().len())
}

pub fn clean_worker_cache() {
    WORKER_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if !cache.is_empty() {
            debug!("Clearing {} cached worker entries", cache.len());
        }
        cache.clear();
    });
}
