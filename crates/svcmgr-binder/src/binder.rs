//! Capability objects and the handles that point at them.
//!
//! # Rust Learning Note
//!
//! ## Weak references as non-owning handles
//!
//! ```rust,ignore
//! pub struct CapabilityHandle {
//!     id: HandleId,
//!     target: Weak<dyn Binder>,
//! }
//! ```
//!
//! - `Arc<T>`: owns the object and keeps it alive
//! - `Weak<T>`: points at the object without keeping it alive
//!
//! A handle never owns the object it refers to. Whoever published the object
//! holds the `Arc`; when they drop it, every handle becomes a "dead object"
//! and the next `transact` fails with a transport error. Nothing in the
//! locator has to run a destructor or clean up after a dead handle.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use svcmgr_common::{Error, Result};
use tracing::trace;

use crate::parcel::Parcel;
use crate::stub::{INTERFACE_TRANSACTION, PING_TRANSACTION};

/// A capability object that accepts transactions.
///
/// Implemented by [`Stub`](crate::Stub) for local implementations, and by
/// whatever object a transport uses to forward calls to another process.
#[async_trait]
pub trait Binder: Send + Sync + 'static {
    /// Interface descriptor this object answers to.
    fn descriptor(&self) -> &str;

    /// Performs one request/response round trip.
    async fn transact(&self, code: u32, data: Parcel) -> Result<Parcel>;

    /// The local implementation behind this object, if any.
    ///
    /// Stubs return the implementation they wrap so same-process callers can
    /// skip marshalling entirely.
    fn local_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Process-unique handle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the object behind a handle lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleOrigin {
    /// Same process: the target may be used directly.
    Local,

    /// Another process: every call must be marshalled through `transact`.
    Remote,
}

/// Opaque, non-owning reference to a capability object.
///
/// Handles are cheap to clone. Two handles are equal when they carry the same
/// [`HandleId`], regardless of whether the target is still alive.
#[derive(Clone)]
pub struct CapabilityHandle {
    id: HandleId,
    origin: HandleOrigin,
    target: Weak<dyn Binder>,
}

impl CapabilityHandle {
    /// Creates a handle with a fresh id for `target`.
    pub fn new(target: Weak<dyn Binder>, origin: HandleOrigin) -> Self {
        Self {
            id: HandleId::next(),
            origin,
            target,
        }
    }

    /// Handle to a same-process object.
    pub fn local(target: &Arc<dyn Binder>) -> Self {
        Self::new(Arc::downgrade(target), HandleOrigin::Local)
    }

    /// Handle to an object reached through a transport.
    ///
    /// `forwarder` is the transport's local stand-in for the remote object.
    pub fn remote(forwarder: &Arc<dyn Binder>) -> Self {
        Self::new(Arc::downgrade(forwarder), HandleOrigin::Remote)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }

    /// Returns true if the target lives in this process.
    pub fn is_local(&self) -> bool {
        self.origin == HandleOrigin::Local
    }

    /// Returns true while the owner still holds the target.
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Sends one transaction to the target.
    ///
    /// Fails with a transport error if the target has been dropped.
    pub async fn transact(&self, code: u32, data: Parcel) -> Result<Parcel> {
        let target = self.upgrade()?;
        trace!("transact handle={} code={} slots={}", self.id, code, data.len());
        target.transact(code, data).await
    }

    /// Checks that the target is alive and answering.
    pub async fn ping(&self) -> Result<()> {
        self.transact(PING_TRANSACTION, Parcel::new()).await.map(|_| ())
    }

    /// Asks the target for its interface descriptor.
    pub async fn interface_descriptor(&self) -> Result<String> {
        let mut reply = self.transact(INTERFACE_TRANSACTION, Parcel::new()).await?;
        reply.read()
    }

    /// Returns the local implementation of type `T` behind this handle.
    ///
    /// Only same-process handles whose target answers to `descriptor` and
    /// exposes a `T` qualify; everything else yields `None`.
    ///
    /// # Rust Learning Note
    ///
    /// ## Downcasting `Arc<dyn Any>`
    ///
    /// ```rust,ignore
    /// let any: Arc<dyn Any + Send + Sync> = binder.local_interface()?;
    /// let typed: Arc<T> = any.downcast::<T>().ok()?;
    /// ```
    ///
    /// `Arc::downcast` checks the `TypeId` at runtime and hands back a typed
    /// `Arc` on success. For contracts, `T` is itself an `Arc<dyn Contract>`,
    /// so the clone at the end is just a reference-count bump.
    pub fn query_local_interface<T>(&self, descriptor: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !self.is_local() {
            return None;
        }
        let target = self.target.upgrade()?;
        if target.descriptor() != descriptor {
            return None;
        }
        let any = target.local_interface()?;
        any.downcast::<T>().ok().map(|typed| (*typed).clone())
    }

    fn upgrade(&self) -> Result<Arc<dyn Binder>> {
        self.target
            .upgrade()
            .ok_or_else(|| Error::transport(format!("Dead object: handle {}", self.id)))
    }
}

impl PartialEq for CapabilityHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CapabilityHandle {}

impl Hash for CapabilityHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("alive", &self.is_alive())
            .finish()
    }
}
