//! Client-side memoization of successful lookups.
//!
//! # Rust Learning Note
//!
//! ## Append-only with `entry().or_insert()`
//!
//! ```rust,ignore
//! self.entries
//!     .entry(name)
//!     .or_insert(handle)
//!     .clone()
//! ```
//!
//! `entry` locks the shard that owns `name`, so two tasks resolving the same
//! name concurrently can't both win: the first insert sticks and the second
//! gets the first one's handle back. A reader never sees a half-written
//! entry because the value is only visible once the shard lock is released.
//!
//! Only positive results are stored. A name that is absent now may be
//! published a moment later; caching the absence would hide it for the rest
//! of the process.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use svcmgr_binder::CapabilityHandle;
use svcmgr_common::{Error, Result, ServiceName};
use tracing::{debug, info};

/// Per-process name-to-handle cache.
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: DashMap<ServiceName, CapabilityHandle>,
    seeded: AtomicBool,
}

impl ServiceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `name`, if any.
    pub fn lookup(&self, name: &ServiceName) -> Option<CapabilityHandle> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Stores a successful resolution and returns the handle now cached.
    ///
    /// If `name` is already cached, the existing handle is kept and returned.
    pub fn insert(&self, name: ServiceName, handle: CapabilityHandle) -> CapabilityHandle {
        let cached = self.entries.entry(name.clone()).or_insert(handle.clone()).clone();
        if cached != handle {
            debug!(
                "Cache already holds {} for {}; keeping it over {}",
                cached.id(),
                name,
                handle.id()
            );
        }
        cached
    }

    /// Seeds the cache in bulk at bootstrap.
    ///
    /// Allowed once, and only while the cache is empty. Concurrent callers
    /// race on the `seeded` flag; exactly one of them seeds.
    pub fn init(&self, entries: impl IntoIterator<Item = (ServiceName, CapabilityHandle)>) -> Result<()> {
        if !self.entries.is_empty()
            || self
                .seeded
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(Error::CacheAlreadyInitialized {
                entries: self.entries.len(),
            });
        }

        for (name, handle) in entries {
            self.insert(name, handle);
        }
        info!("Service cache seeded with {} entries", self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use svcmgr_binder::{Binder, Parcel};

    struct Nop;

    #[async_trait]
    impl Binder for Nop {
        fn descriptor(&self) -> &str {
            "test.INop"
        }

        async fn transact(&self, _code: u32, _data: Parcel) -> Result<Parcel> {
            Ok(Parcel::new())
        }
    }

    fn capability() -> (Arc<dyn Binder>, CapabilityHandle) {
        let binder: Arc<dyn Binder> = Arc::new(Nop);
        let handle = CapabilityHandle::local(&binder);
        (binder, handle)
    }

    #[test]
    fn test_lookup_has_no_side_effects() {
        let cache = ServiceCache::new();
        assert!(cache.lookup(&ServiceName::from("storage.default")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = ServiceCache::new();
        let name = ServiceName::from("storage.default");
        let (_a, first) = capability();
        let (_b, second) = capability();

        assert_eq!(cache.insert(name.clone(), first.clone()), first);
        assert_eq!(cache.insert(name.clone(), second), first);
        assert_eq!(cache.lookup(&name), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_init_only_once() {
        let cache = ServiceCache::new();
        let (_a, handle) = capability();

        cache
            .init(vec![(ServiceName::from("activity"), handle.clone())])
            .unwrap();
        assert_eq!(cache.lookup(&ServiceName::from("activity")), Some(handle.clone()));

        let err = cache
            .init(vec![(ServiceName::from("package"), handle)])
            .unwrap_err();
        assert!(matches!(err, Error::CacheAlreadyInitialized { entries: 1 }));
        assert!(cache.lookup(&ServiceName::from("package")).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_converge_on_one_handle() {
        let cache = Arc::new(ServiceCache::new());
        let name = ServiceName::from("storage.default");
        let mut owners = Vec::new();
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let (owner, handle) = capability();
            owners.push(owner);
            let cache = Arc::clone(&cache);
            let name = name.clone();
            tasks.push(tokio::spawn(async move { cache.insert(name, handle) }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            winners.push(task.await.unwrap());
        }

        let cached = cache.lookup(&name).unwrap();
        assert!(winners.iter().all(|h| *h == cached));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_seeds_once() {
        let cache = Arc::new(ServiceCache::new());
        let mut owners = Vec::new();
        let mut tasks = Vec::new();

        for i in 0..8 {
            let (owner, handle) = capability();
            owners.push(owner);
            let cache = Arc::clone(&cache);
            let name = ServiceName::from(format!("seed{}", i).as_str());
            tasks.push(tokio::spawn(async move { cache.init(vec![(name, handle)]) }));
        }

        let mut seeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => seeded += 1,
                Err(err) => assert!(matches!(err, Error::CacheAlreadyInitialized { .. })),
            }
        }

        assert_eq!(seeded, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_init_refused_after_lookups_populated_cache() {
        let cache = ServiceCache::new();
        let (_a, handle) = capability();
        cache.insert(ServiceName::from("activity"), handle.clone());

        let err = cache
            .init(vec![(ServiceName::from("package"), handle)])
            .unwrap_err();
        assert!(matches!(err, Error::CacheAlreadyInitialized { entries: 1 }));
    }
}
