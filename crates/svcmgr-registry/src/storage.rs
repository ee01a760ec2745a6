//! In-memory storage for the authority.
//!
//! # Rust Learning Note
//!
//! This module demonstrates **concurrent data structures** in Rust.
//!
//! ## DashMap vs RwLock<HashMap>
//!
//! ```rust,ignore
//! struct Registry {
//!     services: DashMap<ServiceName, RegistryEntry>,
//! }
//!
//! fn lookup(&self, name: &ServiceName) -> Option<RegistryEntry> {
//!     self.services.get(name).map(|entry| entry.clone())
//! }
//! // No manual locking needed!
//! ```
//!
//! DashMap shards the table and locks one shard at a time, so publications
//! of unrelated names do not contend with each other, and the API can't be
//! misused by forgetting to take a lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use svcmgr_binder::CapabilityHandle;
use svcmgr_common::{DumpPriority, Error, Result, ServiceName};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::contract::ServiceRegistry;
use crate::types::{CallerContext, RegistryEntry};

/// Capacity of the publication notification channel.
const NOTIFICATION_CAPACITY: usize = 64;

/// Thread-safe in-memory registry: the canonical name-to-handle table.
///
/// # Rust Learning Note
///
/// `&self` everywhere, never `&mut self`: DashMap gives us **interior
/// mutability**, so one `Arc<Registry>` can be shared by every task that
/// publishes or resolves.
#[derive(Clone)]
pub struct Registry {
    services: Arc<DashMap<ServiceName, RegistryEntry>>,
    published: broadcast::Sender<ServiceName>,
}

impl Registry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        let (published, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            services: Arc::new(DashMap::new()),
            published,
        }
    }

    /// Publishes or replaces a service.
    pub fn publish(&self, name: &ServiceName, entry: RegistryEntry) -> Result<()> {
        name.validate()
            .map_err(|e| Error::transport(format!("Publication rejected: {}", e)))?;
        if !entry.handle.is_alive() {
            return Err(Error::transport(format!(
                "Publication rejected: handle {} for {} is a dead object",
                entry.handle.id(),
                name
            )));
        }

        let handle_id = entry.handle.id();
        if let Some(previous) = self.services.insert(name.clone(), entry) {
            info!(
                "Replaced service {} (handle {} -> {})",
                name,
                previous.handle.id(),
                handle_id
            );
        } else {
            info!("Registered new service: {} (handle {})", name, handle_id);
        }

        // No receivers is fine: nobody is waiting
        let _ = self.published.send(name.clone());
        Ok(())
    }

    /// Looks up a live, visible entry.
    ///
    /// Entries whose handle died since publication are dropped on the way.
    pub fn lookup(&self, name: &ServiceName, caller: &CallerContext) -> Option<RegistryEntry> {
        let entry = self.services.get(name).map(|entry| entry.clone())?;
        if !entry.handle.is_alive() {
            self.prune(name, &entry.handle);
            return None;
        }
        entry.visible_to(caller).then_some(entry)
    }

    /// Lists visible, live names matching `dump_priority`, sorted.
    pub fn list(&self, dump_priority: DumpPriority, caller: &CallerContext) -> Vec<ServiceName> {
        let mut dead = Vec::new();
        let mut names: Vec<ServiceName> = self
            .services
            .iter()
            .filter_map(|entry| {
                if !entry.handle.is_alive() {
                    dead.push((entry.key().clone(), entry.handle.clone()));
                    return None;
                }
                (entry.visible_to(caller) && entry.dump_priority.intersects(dump_priority))
                    .then(|| entry.key().clone())
            })
            .collect();

        for (name, handle) in dead {
            self.prune(&name, &handle);
        }

        names.sort();
        names
    }

    /// Removes a service from the registry.
    pub fn remove(&self, name: &ServiceName) -> Result<()> {
        self.services
            .remove(name)
            .ok_or_else(|| Error::not_found(name.as_str()))?;

        info!("Removed service: {}", name);
        Ok(())
    }

    /// Returns the number of registered services, dead or alive.
    pub fn count(&self) -> usize {
        self.services.len()
    }

    // Only removes the entry if it still holds the dead handle; a
    // republication may have raced in.
    fn prune(&self, name: &ServiceName, dead: &CapabilityHandle) {
        if self
            .services
            .remove_if(name, |_, entry| entry.handle == *dead)
            .is_some()
        {
            debug!("Pruned dead service {} (handle {})", name, dead.id());
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for Registry {
    async fn get_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>> {
        Ok(self.lookup(name, &caller).map(|entry| entry.handle))
    }

    async fn check_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>> {
        Ok(self.lookup(name, &caller).map(|entry| entry.handle))
    }

    async fn add_service(
        &self,
        name: &ServiceName,
        handle: CapabilityHandle,
        allow_isolated: bool,
        dump_priority: DumpPriority,
    ) -> Result<()> {
        self.publish(name, RegistryEntry::new(handle, allow_isolated, dump_priority))
    }

    async fn list_services(
        &self,
        dump_priority: DumpPriority,
        caller: CallerContext,
    ) -> Result<Vec<ServiceName>> {
        Ok(self.list(dump_priority, &caller))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ServiceName>> {
        Some(self.published.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn entry(handle: &CapabilityHandle) -> RegistryEntry {
        RegistryEntry::new(handle.clone(), false, DumpPriority::DEFAULT)
    }

    #[test]
    fn test_registry_publish_and_lookup() {
        let registry = Registry::new();
        let name = ServiceName::from("storage.default");
        let (_owner, handle) = capability();

        registry.publish(&name, entry(&handle)).unwrap();

        let found = registry.lookup(&name, &CallerContext::trusted()).unwrap();
        assert_eq!(found.handle, handle);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_republish_replaces() {
        let registry = Registry::new();
        let name = ServiceName::from("storage.default");
        let (_first_owner, first) = capability();
        let (_second_owner, second) = capability();

        registry.publish(&name, entry(&first)).unwrap();
        registry.publish(&name, entry(&second)).unwrap();

        let found = registry.lookup(&name, &CallerContext::trusted()).unwrap();
        assert_eq!(found.handle, second);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_registry_rejects_invalid_publications() {
        let registry = Registry::new();
        let (owner, handle) = capability();

        let err = registry.publish(&ServiceName::from(""), entry(&handle)).unwrap_err();
        assert!(err.is_transport());

        drop(owner);
        let err = registry
            .publish(&ServiceName::from("storage.default"), entry(&handle))
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_dead_entries_are_pruned() {
        let registry = Registry::new();
        let name = ServiceName::from("storage.default");
        let (owner, handle) = capability();
        registry.publish(&name, entry(&handle)).unwrap();

        drop(owner);
        assert!(registry.lookup(&name, &CallerContext::trusted()).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_isolated_callers_see_only_opted_in_services() {
        let registry = Registry::new();
        let (_owner_a, private) = capability();
        let (_owner_b, shared) = capability();

        registry
            .publish(&ServiceName::from("private"), RegistryEntry::new(private, false, DumpPriority::DEFAULT))
            .unwrap();
        registry
            .publish(&ServiceName::from("shared"), RegistryEntry::new(shared, true, DumpPriority::DEFAULT))
            .unwrap();

        let isolated = CallerContext::isolated();
        assert!(registry.lookup(&ServiceName::from("private"), &isolated).is_none());
        assert!(registry.lookup(&ServiceName::from("shared"), &isolated).is_some());
        assert_eq!(
            registry.list(DumpPriority::ALL, &isolated),
            vec![ServiceName::from("shared")]
        );
    }

    #[test]
    fn test_list_filters_by_dump_priority() {
        let registry = Registry::new();
        let (_a, critical) = capability();
        let (_b, normal) = capability();

        registry
            .publish(&ServiceName::from("b.critical"), RegistryEntry::new(critical, false, DumpPriority::CRITICAL))
            .unwrap();
        registry
            .publish(&ServiceName::from("a.normal"), RegistryEntry::new(normal, false, DumpPriority::NORMAL))
            .unwrap();

        let trusted = CallerContext::trusted();
        assert_eq!(
            registry.list(DumpPriority::ALL, &trusted),
            vec![ServiceName::from("a.normal"), ServiceName::from("b.critical")]
        );
        assert_eq!(
            registry.list(DumpPriority::CRITICAL, &trusted),
            vec![ServiceName::from("b.critical")]
        );
    }

    #[test]
    fn test_registry_remove() {
        let registry = Registry::new();
        let name = ServiceName::from("storage.default");
        let (_owner, handle) = capability();
        registry.publish(&name, entry(&handle)).unwrap();

        registry.remove(&name).unwrap();
        assert!(registry.lookup(&name, &CallerContext::trusted()).is_none());
        assert!(matches!(registry.remove(&name), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_publication_is_broadcast() {
        let registry = Registry::new();
        let mut notifications = registry.subscribe().unwrap();
        let (_owner, handle) = capability();

        registry
            .add_service(&ServiceName::from("storage.default"), handle, false, DumpPriority::DEFAULT)
            .await
            .unwrap();

        assert_eq!(notifications.recv().await.unwrap(), ServiceName::from("storage.default"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_concurrent_access() {
        let registry = Arc::new(Registry::new());
        let mut owners = Vec::new();
        let mut handles = vec![];

        // Spawn multiple tasks that publish concurrently
        for i in 0..10 {
            let registry = Arc::clone(&registry);
            let (owner, handle) = capability();
            owners.push(owner);
            handles.push(tokio::spawn(async move {
                let name = ServiceName::from(format!("service-{}", i));
                registry.publish(&name, entry(&handle)).unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.count(), 10);
        assert_eq!(registry.list(DumpPriority::ALL, &CallerContext::trusted()).len(), 10);
    }
}
