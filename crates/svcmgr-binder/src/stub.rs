//! Server-side half of a capability contract.
//!
//! # Rust Learning Note
//!
//! ## Integer codes become an enum switch
//!
//! On the wire an operation is just a `u32`. Each contract defines an enum of
//! its operations and implements [`TransactionCode`] for it:
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Copy)]
//! enum StorageOp { Get = 1, Put = 2 }
//!
//! impl TransactionCode for StorageOp {
//!     fn code(self) -> u32 { self as u32 }
//!     fn from_code(code: u32) -> Option<Self> {
//!         match code { 1 => Some(Self::Get), 2 => Some(Self::Put), _ => None }
//!     }
//! }
//! ```
//!
//! [`Stub`] decodes the code once, and the contract's [`Dispatch`] impl then
//! `match`es on the enum. The compiler checks that every operation is handled.
//! Codes are assigned when the contract is defined and never renumbered; new
//! operations are appended.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use svcmgr_common::{Error, Result};
use tracing::{debug, trace};

use crate::binder::{Binder, CapabilityHandle, HandleOrigin};
use crate::parcel::Parcel;

/// First code available to contract operations.
pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;

/// Last code available to contract operations.
pub const LAST_CALL_TRANSACTION: u32 = 0x00ff_ffff;

/// Liveness check answered by every stub with an empty reply.
pub const PING_TRANSACTION: u32 = u32::from_be_bytes(*b"_PNG");

/// Descriptor query answered by every stub.
pub const INTERFACE_TRANSACTION: u32 = u32::from_be_bytes(*b"_NTF");

/// Maps a contract's operation enum to and from its wire code.
pub trait TransactionCode: Copy + fmt::Debug + Send + Sync + 'static {
    fn code(self) -> u32;

    fn from_code(code: u32) -> Option<Self>;
}

/// Contract-specific dispatch of decoded operations to a local implementation.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Interface descriptor registered by the stub.
    const DESCRIPTOR: &'static str;

    /// The contract's operation enum.
    type Op: TransactionCode;

    /// Reads the arguments of `op` from `data`, calls the implementation and
    /// writes the result into `reply`.
    async fn dispatch(&self, op: Self::Op, data: &mut Parcel, reply: &mut Parcel) -> Result<()>;

    /// The implementation exposed to same-process callers.
    fn local_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Wraps a local implementation and exposes it as a capability object.
///
/// A stub owns its own [`CapabilityHandle`], created once at construction, so
/// every publication of the same stub carries the same identity.
pub struct Stub<D: Dispatch> {
    dispatcher: D,
    handle: CapabilityHandle,
}

impl<D: Dispatch> Stub<D> {
    /// Creates the stub and attaches its handle.
    pub fn new(dispatcher: D) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Stub<D>>| {
            let target: Weak<dyn Binder> = weak.clone();
            Stub {
                dispatcher,
                handle: CapabilityHandle::new(target, HandleOrigin::Local),
            }
        })
    }

    /// The handle to publish for this stub.
    pub fn handle(&self) -> CapabilityHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl<D: Dispatch> Binder for Stub<D> {
    fn descriptor(&self) -> &str {
        D::DESCRIPTOR
    }

    async fn transact(&self, code: u32, mut data: Parcel) -> Result<Parcel> {
        let mut reply = Parcel::new();

        match code {
            PING_TRANSACTION => return Ok(reply),
            INTERFACE_TRANSACTION => {
                reply.write(D::DESCRIPTOR)?;
                return Ok(reply);
            }
            _ => {}
        }

        let op = D::Op::from_code(code).ok_or_else(|| {
            debug!("{}: rejecting unknown transaction code {}", D::DESCRIPTOR, code);
            Error::unknown_transaction(D::DESCRIPTOR, code)
        })?;

        data.enforce_interface(D::DESCRIPTOR)?;
        trace!("{}: dispatching {:?}", D::DESCRIPTOR, op);

        self.dispatcher.dispatch(op, &mut data, &mut reply).await?;
        Ok(reply)
    }

    fn local_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.dispatcher.local_interface()
    }
}

impl<D: Dispatch> fmt::Debug for Stub<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("descriptor", &D::DESCRIPTOR)
            .field("handle", &self.handle.id())
            .finish()
    }
}
