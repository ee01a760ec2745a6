//! # svcmgr Binder
//! 
//! The capability layer every contract rides on:
//! - **Capability handles**: opaque, non-owning references to objects
//! - **Parcels**: request/reply payloads that can also carry handles
//! - **Stub / Proxy**: the two symmetric halves of a capability contract
//!   (server-side dispatch by operation code, client-side forwarding)

pub mod binder;
pub mod parcel;
pub mod proxy;
pub mod stub;

// Re-export commonly used items
pub use binder::{Binder, CapabilityHandle, HandleId, HandleOrigin};
pub use parcel::Parcel;
pub use proxy::{as_interface, Proxy};
pub use stub::{
    Dispatch, Stub, TransactionCode, FIRST_CALL_TRANSACTION, INTERFACE_TRANSACTION,
    LAST_CALL_TRANSACTION, PING_TRANSACTION,
};
