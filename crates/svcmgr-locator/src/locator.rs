//! The service locator.
//!
//! # Rust Learning Note
//!
//! ## Absence is not an error
//!
//! Lookups come in two flavours that share one resolution path:
//!
//! ```rust,ignore
//! // Absent (or unreachable authority) is an ordinary outcome
//! let maybe: Option<CapabilityHandle> = locator.get_service("storage.default").await;
//!
//! // Absent is the caller's problem
//! let handle: CapabilityHandle = locator.get_service_or_throw("storage.default").await?;
//! ```
//!
//! Both go through `resolve`, which returns `Result<Option<_>>`. The outer
//! `Result` is the transport, the inner `Option` is the authority's answer.
//! Each public method decides which of the two layers it surfaces.
//!
//! ## Waiting without a thread
//!
//! `wait_for_service` suspends the calling task, not a thread. Between
//! checks it listens for publications when the transport offers a
//! notification stream, and otherwise sleeps with a capped, doubling delay.
//! It has no timeout of its own; wrap it with
//! [`wait_for_service_timeout`](ServiceLocator::wait_for_service_timeout) or
//! [`wait_for_service_cancellable`](ServiceLocator::wait_for_service_cancellable).

use std::sync::Arc;
use std::time::{Duration, Instant};
use svcmgr_binder::CapabilityHandle;
use svcmgr_common::{Classification, DumpPriority, Error, Result, ServiceName};
use svcmgr_registry::ServiceRegistry;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ServiceCache;
use crate::config::LocatorConfig;
use crate::connector::Connector;
use crate::diagnostics::{DiagnosticSink, LookupDiagnostics, TracingSink};
use crate::manifest::DeclarationManifest;

/// Floor of the wait backoff. An unvalidated zero minimum would otherwise
/// never grow and spin on the transport.
const MIN_WAIT_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Get,
    Check,
}

/// Process-wide entry point for finding, waiting for and publishing
/// capabilities.
///
/// Composes a [`ServiceCache`], [`LookupDiagnostics`] and a transport that
/// is obtained from the [`Connector`] on first use.
pub struct ServiceLocator {
    config: LocatorConfig,
    connector: Arc<dyn Connector>,
    transport: OnceCell<Arc<dyn ServiceRegistry>>,
    cache: ServiceCache,
    diagnostics: LookupDiagnostics,
    manifest: DeclarationManifest,
}

impl ServiceLocator {
    /// Creates a locator that logs diagnostics through `tracing`.
    pub fn new(
        config: LocatorConfig,
        connector: Arc<dyn Connector>,
        manifest: DeclarationManifest,
    ) -> Self {
        Self::with_sink(config, connector, manifest, Arc::new(TracingSink))
    }

    /// Creates a locator with a custom diagnostics sink.
    pub fn with_sink(
        config: LocatorConfig,
        connector: Arc<dyn Connector>,
        manifest: DeclarationManifest,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let diagnostics = LookupDiagnostics::new(
            config.thresholds(Classification::Core),
            config.thresholds(Classification::NonCore),
            sink,
        );

        Self {
            config,
            connector,
            transport: OnceCell::new(),
            cache: ServiceCache::new(),
            diagnostics,
            manifest,
        }
    }

    /// Resolves `name`, or `None` if it is not published or the authority
    /// cannot be reached.
    pub async fn get_service(&self, name: impl Into<ServiceName>) -> Option<CapabilityHandle> {
        let name = name.into();
        self.resolve_or_absent(&name, Lookup::Get).await
    }

    /// Resolves `name`, failing with [`Error::NotFound`] if it is not
    /// published.
    pub async fn get_service_or_throw(&self, name: impl Into<ServiceName>) -> Result<CapabilityHandle> {
        let name = name.into();
        self.resolve(&name, Lookup::Get)
            .await?
            .ok_or_else(|| Error::not_found(name.as_str()))
    }

    /// Resolves `name` without waiting for it to be published.
    pub async fn check_service(&self, name: impl Into<ServiceName>) -> Option<CapabilityHandle> {
        let name = name.into();
        self.resolve_or_absent(&name, Lookup::Check).await
    }

    /// Suspends until `name` is published, however long that takes.
    ///
    /// Safe to call before the authority is reachable: connection failures
    /// are retried in the same loop.
    pub async fn wait_for_service(&self, name: impl Into<ServiceName>) -> CapabilityHandle {
        let name = name.into();
        let mut delay = self.config.wait_backoff_min().max(MIN_WAIT_DELAY);
        let max_delay = self.config.wait_backoff_max().max(delay);
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;

            // Subscribe before checking, so a publication in between still wakes us
            let notifications = match self.transport().await {
                Ok(transport) => transport.subscribe(),
                Err(e) => {
                    debug!("Registry not reachable while waiting for {}: {}", name, e);
                    None
                }
            };

            match self.resolve(&name, Lookup::Check).await {
                Ok(Some(handle)) => {
                    if attempts > 1 {
                        info!("Service {} available after {} checks", name, attempts);
                    }
                    return handle;
                }
                Ok(None) => {}
                Err(e) => debug!("Lookup of {} failed while waiting: {}", name, e),
            }

            if attempts == 1 {
                info!("Waiting for service {}", name);
            }

            match notifications {
                Some(mut rx) => {
                    let _ = tokio::time::timeout(delay, publication_of(&mut rx, &name)).await;
                }
                None => tokio::time::sleep(delay).await,
            }
            delay = (delay * 2).min(max_delay);
        }
    }

    /// Like [`wait_for_service`](Self::wait_for_service), but fails
    /// immediately if `name` is not declared in the manifest.
    pub async fn wait_for_declared_service(&self, name: impl Into<ServiceName>) -> Result<CapabilityHandle> {
        let name = name.into();
        if !self.manifest.is_declared(&name) {
            return Err(Error::declaration_mismatch(name.as_str()));
        }
        Ok(self.wait_for_service(name).await)
    }

    /// Waits for `name` for at most `timeout`.
    pub async fn wait_for_service_timeout(
        &self,
        name: impl Into<ServiceName>,
        timeout: Duration,
    ) -> Result<CapabilityHandle> {
        let name = name.into();
        tokio::time::timeout(timeout, self.wait_for_service(name.clone()))
            .await
            .map_err(|_| Error::Timeout {
                name: name.to_string(),
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    /// Waits for `name` until it is published or `token` is cancelled.
    pub async fn wait_for_service_cancellable(
        &self,
        name: impl Into<ServiceName>,
        token: &CancellationToken,
    ) -> Result<CapabilityHandle> {
        let name = name.into();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Wait for {} cancelled", name);
                Err(Error::Cancelled { name: name.to_string() })
            }
            handle = self.wait_for_service(name.clone()) => Ok(handle),
        }
    }

    /// Publishes `handle` under `name` at the authority.
    pub async fn add_service(
        &self,
        name: impl Into<ServiceName>,
        handle: CapabilityHandle,
        allow_isolated: bool,
        dump_priority: DumpPriority,
    ) -> Result<()> {
        let name = name.into();
        let transport = self.transport().await?;
        transport
            .add_service(&name, handle.clone(), allow_isolated, dump_priority)
            .await?;

        info!(
            "Published {} as {} (allow_isolated={}, dump_priority={:#x})",
            handle.id(),
            name,
            allow_isolated,
            dump_priority.bits()
        );
        Ok(())
    }

    /// Publishes with `allow_isolated = false` and the default dump
    /// priority.
    pub async fn add_service_default(
        &self,
        name: impl Into<ServiceName>,
        handle: CapabilityHandle,
    ) -> Result<()> {
        self.add_service(name, handle, false, DumpPriority::DEFAULT).await
    }

    /// Lists every published name visible to this process.
    ///
    /// Always asks the authority; the cache is not consulted.
    pub async fn list_services(&self) -> Result<Vec<ServiceName>> {
        self.list_services_with_priority(DumpPriority::ALL).await
    }

    /// Lists published names whose dump priority intersects `dump_priority`.
    pub async fn list_services_with_priority(&self, dump_priority: DumpPriority) -> Result<Vec<ServiceName>> {
        let transport = self.transport().await?;
        transport
            .list_services(dump_priority, self.config.caller_context())
            .await
    }

    /// Returns true if `name` is declared in the manifest.
    pub fn is_declared(&self, name: impl Into<ServiceName>) -> bool {
        self.manifest.is_declared(&name.into())
    }

    /// Instances the manifest declares for `interface`.
    pub fn get_declared_instances(&self, interface: &str) -> Vec<String> {
        self.manifest.declared_instances(interface)
    }

    /// Seeds the cache at bootstrap. Fails if anything is cached already.
    pub fn init_service_cache(
        &self,
        entries: impl IntoIterator<Item = (ServiceName, CapabilityHandle)>,
    ) -> Result<()> {
        self.cache.init(entries)
    }

    pub fn cache(&self) -> &ServiceCache {
        &self.cache
    }

    pub fn diagnostics(&self) -> &LookupDiagnostics {
        &self.diagnostics
    }

    async fn transport(&self) -> Result<Arc<dyn ServiceRegistry>> {
        let transport = self
            .transport
            .get_or_try_init(|| self.connector.connect())
            .await?;
        Ok(Arc::clone(transport))
    }

    async fn resolve_or_absent(&self, name: &ServiceName, lookup: Lookup) -> Option<CapabilityHandle> {
        match self.resolve(name, lookup).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Lookup of {} failed, treating as absent: {}", name, e);
                None
            }
        }
    }

    async fn resolve(&self, name: &ServiceName, lookup: Lookup) -> Result<Option<CapabilityHandle>> {
        if let Some(handle) = self.cache.lookup(name) {
            debug!("Cache hit for {}", name);
            return Ok(Some(handle));
        }

        let transport = self.transport().await?;
        let caller = self.config.caller_context();
        let started = Instant::now();
        let result = match lookup {
            Lookup::Get => transport.get_service(name, caller).await,
            Lookup::Check => transport.check_service(name, caller).await,
        };
        self.diagnostics
            .record(self.config.classification, name, started.elapsed());

        match result? {
            Some(handle) => Ok(Some(self.cache.insert(name.clone(), handle))),
            None => {
                debug!("Cache miss for {}: not published", name);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("config", &self.config)
            .field("connected", &self.transport.initialized())
            .field("cached", &self.cache.len())
            .finish()
    }
}

// Returns once `name` is published, or when notifications may have been
// missed and the caller should check again.
async fn publication_of(rx: &mut broadcast::Receiver<ServiceName>, name: &ServiceName) {
    loop {
        match rx.recv().await {
            Ok(published) if published == *name => return,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!("Missed {} publications while waiting for {}", skipped, name);
                return;
            }
            // Nothing will ever arrive; let the caller's timeout elapse
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
