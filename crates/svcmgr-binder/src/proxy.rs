//! Client-side half of a capability contract.
//!
//! A contract's proxy holds a [`Proxy`] and implements the contract trait by
//! marshalling each call into a transaction:
//!
//! ```rust,ignore
//! async fn get(&self, key: &str) -> Result<Option<String>> {
//!     let mut data = self.remote.request()?;
//!     data.write(key)?;
//!     let mut reply = self.remote.call(StorageOp::Get, data).await?;
//!     self.remote.read_reply(StorageOp::Get, &mut reply)
//! }
//! ```
//!
//! Every failure on this path is reported as a transport failure, whatever
//! its underlying cause.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use svcmgr_common::{Error, Result};
use tracing::debug;

use crate::binder::CapabilityHandle;
use crate::parcel::Parcel;
use crate::stub::TransactionCode;

/// Forwarding helper shared by all contract proxies.
#[derive(Debug, Clone)]
pub struct Proxy {
    remote: CapabilityHandle,
    descriptor: &'static str,
}

impl Proxy {
    pub fn new(remote: CapabilityHandle, descriptor: &'static str) -> Self {
        Self { remote, descriptor }
    }

    /// The handle calls are forwarded to.
    pub fn remote(&self) -> &CapabilityHandle {
        &self.remote
    }

    pub fn descriptor(&self) -> &'static str {
        self.descriptor
    }

    /// Starts a request parcel carrying the interface token.
    pub fn request(&self) -> Result<Parcel> {
        let mut data = Parcel::new();
        data.write_interface_token(self.descriptor)?;
        Ok(data)
    }

    /// Sends `data` as operation `op` and waits for the reply.
    pub async fn call<C: TransactionCode>(&self, op: C, data: Parcel) -> Result<Parcel> {
        self.remote
            .transact(op.code(), data)
            .await
            .map_err(|e| self.transport_error(op, e))
    }

    /// Reads the next reply value, mapping unmarshal failures like any other
    /// transport failure of `op`.
    pub fn read_reply<C: TransactionCode, T: DeserializeOwned>(
        &self,
        op: C,
        reply: &mut Parcel,
    ) -> Result<T> {
        reply.read().map_err(|e| self.transport_error(op, e))
    }

    /// Reads the next reply handle slot.
    pub fn read_reply_handle<C: TransactionCode>(
        &self,
        op: C,
        reply: &mut Parcel,
    ) -> Result<Option<CapabilityHandle>> {
        reply.read_handle().map_err(|e| self.transport_error(op, e))
    }

    fn transport_error<C: TransactionCode>(&self, op: C, error: Error) -> Error {
        debug!(
            "{}: {:?} failed on handle {}: {}",
            self.descriptor,
            op,
            self.remote.id(),
            error
        );
        match error {
            Error::Transport { .. } => error,
            other => Error::transport(format!("{} {:?}: {}", self.descriptor, op, other)),
        }
    }
}

/// Resolves a handle to a contract implementation.
///
/// Same-process handles whose target is a stub of this contract return the
/// wrapped implementation directly. Anything else gets a proxy built by
/// `make_proxy`.
///
/// # Rust Learning Note
///
/// `I` is usually a trait object (`dyn Storage`), so the function works with
/// `Arc<I>` and never needs `I: Sized`:
///
/// ```rust,ignore
/// let storage: Arc<dyn Storage> =
///     as_interface::<dyn Storage, _>(&handle, STORAGE_DESCRIPTOR, |h| Arc::new(StorageProxy::new(h)));
/// ```
pub fn as_interface<I, F>(handle: &CapabilityHandle, descriptor: &'static str, make_proxy: F) -> Arc<I>
where
    I: ?Sized + Send + Sync + 'static,
    F: FnOnce(CapabilityHandle) -> Arc<I>,
{
    if let Some(local) = handle.query_local_interface::<Arc<I>>(descriptor) {
        return local;
    }
    make_proxy(handle.clone())
}
