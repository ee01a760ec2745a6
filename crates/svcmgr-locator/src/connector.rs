//! How a locator obtains its transport to the authority.
//!
//! # Rust Learning Note
//!
//! ## Connecting late
//!
//! The locator never connects at construction time. It asks its
//! [`Connector`] on first use, and again on the next call if that attempt
//! failed:
//!
//! ```rust,ignore
//! let transport = self
//!     .transport
//!     .get_or_try_init(|| self.connector.connect())
//!     .await?;
//! ```
//!
//! `OnceCell::get_or_try_init` only stores `Ok` values, so an authority that
//! is not up yet during bootstrap is simply retried later.

use async_trait::async_trait;
use std::sync::Arc;
use svcmgr_binder::CapabilityHandle;
use svcmgr_common::{Error, Result};
use svcmgr_registry::{as_interface, ServiceRegistry};
use tracing::debug;

/// Produces the transport a locator talks to.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ServiceRegistry>>;
}

/// Hands out an already-connected transport.
pub struct StaticConnector {
    registry: Arc<dyn ServiceRegistry>,
}

impl StaticConnector {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn ServiceRegistry>> {
        Ok(Arc::clone(&self.registry))
    }
}

/// Connects through the authority's well-known context handle.
///
/// A same-process handle resolves to the registry itself; any other handle
/// is wrapped in a proxy.
pub struct ContextObjectConnector {
    context: CapabilityHandle,
}

impl ContextObjectConnector {
    pub fn new(context: CapabilityHandle) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Connector for ContextObjectConnector {
    async fn connect(&self) -> Result<Arc<dyn ServiceRegistry>> {
        if !self.context.is_alive() {
            return Err(Error::transport(format!(
                "Registry context object {} is a dead object",
                self.context.id()
            )));
        }

        debug!(
            "Connecting to registry through context object {} ({:?})",
            self.context.id(),
            self.context.origin()
        );
        Ok(as_interface(&self.context))
    }
}
