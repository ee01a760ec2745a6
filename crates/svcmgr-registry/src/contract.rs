//! The registry's own capability contract.
//!
//! The authority is reached the same way as any other capability: through a
//! handle. A same-process handle resolves straight to the [`Registry`]
//! behind it; anything else goes through [`ServiceRegistryProxy`].
//!
//! Operation codes are part of the contract and must never be renumbered:
//!
//! | op | code |
//! |---|---|
//! | GetService | 1 |
//! | CheckService | 2 |
//! | AddService | 3 |
//! | ListServices | 4 |
//!
//! [`Registry`]: crate::Registry

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use svcmgr_binder::{
    CapabilityHandle, Dispatch, Parcel, Proxy, Stub, TransactionCode, FIRST_CALL_TRANSACTION,
};
use svcmgr_common::{DumpPriority, Error, Result, ServiceName};
use tokio::sync::broadcast;

use crate::types::CallerContext;

/// Interface descriptor of the registry contract.
pub const REGISTRY_DESCRIPTOR: &str = "svcmgr.IServiceRegistry";

/// Operations exposed by the authority.
///
/// The locator talks to any `Arc<dyn ServiceRegistry>`: the in-process
/// registry itself, a proxy to another process, or a fake in tests.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Resolves `name`, returning `None` if nothing visible is published.
    async fn get_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>>;

    /// Same as `get_service`, without any implied waiting on the authority
    /// side.
    async fn check_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>>;

    /// Publishes `handle` under `name`, replacing any previous publication.
    async fn add_service(
        &self,
        name: &ServiceName,
        handle: CapabilityHandle,
        allow_isolated: bool,
        dump_priority: DumpPriority,
    ) -> Result<()>;

    /// Lists names whose dump priority intersects `dump_priority`.
    async fn list_services(
        &self,
        dump_priority: DumpPriority,
        caller: CallerContext,
    ) -> Result<Vec<ServiceName>>;

    /// Stream of names as they get published, if this transport offers one.
    fn subscribe(&self) -> Option<broadcast::Receiver<ServiceName>> {
        None
    }
}

/// Operation codes of the registry contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOp {
    GetService,
    CheckService,
    AddService,
    ListServices,
}

impl TransactionCode for RegistryOp {
    fn code(self) -> u32 {
        match self {
            RegistryOp::GetService => FIRST_CALL_TRANSACTION,
            RegistryOp::CheckService => FIRST_CALL_TRANSACTION + 1,
            RegistryOp::AddService => FIRST_CALL_TRANSACTION + 2,
            RegistryOp::ListServices => FIRST_CALL_TRANSACTION + 3,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code.checked_sub(FIRST_CALL_TRANSACTION)? {
            0 => Some(RegistryOp::GetService),
            1 => Some(RegistryOp::CheckService),
            2 => Some(RegistryOp::AddService),
            3 => Some(RegistryOp::ListServices),
            _ => None,
        }
    }
}

/// Server-side dispatch of registry transactions to an implementation.
pub struct RegistryDispatch {
    registry: Arc<dyn ServiceRegistry>,
}

impl RegistryDispatch {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Dispatch for RegistryDispatch {
    const DESCRIPTOR: &'static str = REGISTRY_DESCRIPTOR;
    type Op = RegistryOp;

    async fn dispatch(&self, op: RegistryOp, data: &mut Parcel, reply: &mut Parcel) -> Result<()> {
        match op {
            RegistryOp::GetService | RegistryOp::CheckService => {
                let name: ServiceName = data.read()?;
                let caller: CallerContext = data.read()?;
                let handle = if op == RegistryOp::GetService {
                    self.registry.get_service(&name, caller).await?
                } else {
                    self.registry.check_service(&name, caller).await?
                };
                reply.write_handle(handle.as_ref());
            }
            RegistryOp::AddService => {
                let name: ServiceName = data.read()?;
                let handle = data
                    .read_handle()?
                    .ok_or_else(|| Error::transport(format!("Null handle published for {}", name)))?;
                let allow_isolated: bool = data.read()?;
                let dump_priority: DumpPriority = data.read()?;
                self.registry
                    .add_service(&name, handle, allow_isolated, dump_priority)
                    .await?;
            }
            RegistryOp::ListServices => {
                let dump_priority: DumpPriority = data.read()?;
                let caller: CallerContext = data.read()?;
                let names = self.registry.list_services(dump_priority, caller).await?;
                reply.write(&names)?;
            }
        }
        Ok(())
    }

    fn local_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(Arc::new(self.registry.clone()))
    }
}

/// Client-side forwarding of registry calls through a handle.
#[derive(Debug, Clone)]
pub struct ServiceRegistryProxy {
    remote: Proxy,
}

impl ServiceRegistryProxy {
    pub fn new(remote: CapabilityHandle) -> Self {
        Self {
            remote: Proxy::new(remote, REGISTRY_DESCRIPTOR),
        }
    }

    async fn lookup(
        &self,
        op: RegistryOp,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>> {
        let mut data = self.remote.request()?;
        data.write(name)?;
        data.write(&caller)?;
        let mut reply = self.remote.call(op, data).await?;
        self.remote.read_reply_handle(op, &mut reply)
    }
}

#[async_trait]
impl ServiceRegistry for ServiceRegistryProxy {
    async fn get_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>> {
        self.lookup(RegistryOp::GetService, name, caller).await
    }

    async fn check_service(
        &self,
        name: &ServiceName,
        caller: CallerContext,
    ) -> Result<Option<CapabilityHandle>> {
        self.lookup(RegistryOp::CheckService, name, caller).await
    }

    async fn add_service(
        &self,
        name: &ServiceName,
        handle: CapabilityHandle,
        allow_isolated: bool,
        dump_priority: DumpPriority,
    ) -> Result<()> {
        let mut data = self.remote.request()?;
        data.write(name)?;
        data.write_handle(Some(&handle));
        data.write(&allow_isolated)?;
        data.write(&dump_priority)?;
        self.remote.call(RegistryOp::AddService, data).await?;
        Ok(())
    }

    async fn list_services(
        &self,
        dump_priority: DumpPriority,
        caller: CallerContext,
    ) -> Result<Vec<ServiceName>> {
        let mut data = self.remote.request()?;
        data.write(&dump_priority)?;
        data.write(&caller)?;
        let mut reply = self.remote.call(RegistryOp::ListServices, data).await?;
        self.remote.read_reply(RegistryOp::ListServices, &mut reply)
    }
}

/// Resolves a handle to the registry contract.
pub fn as_interface(handle: &CapabilityHandle) -> Arc<dyn ServiceRegistry> {
    svcmgr_binder::as_interface::<dyn ServiceRegistry, _>(handle, REGISTRY_DESCRIPTOR, |remote| {
        Arc::new(ServiceRegistryProxy::new(remote))
    })
}

/// Wraps a registry in a stub so it can be handed out as a capability.
///
/// The caller must keep the returned stub alive for as long as the registry
/// should stay reachable.
pub fn serve(registry: Arc<dyn ServiceRegistry>) -> Arc<Stub<RegistryDispatch>> {
    Stub::new(RegistryDispatch::new(registry))
}
