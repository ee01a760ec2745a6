//! # svcmgr Registry
//! 
//! The authority that holds the canonical name-to-handle table.
//! 
//! This crate provides:
//! - In-memory registry storage (thread-safe with DashMap)
//! - The `ServiceRegistry` capability contract: operation codes, stub
//!   dispatch and a forwarding proxy
//! - Publication notifications for waiters

pub mod contract;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub use contract::{
    as_interface, serve, RegistryDispatch, RegistryOp, ServiceRegistry, ServiceRegistryProxy,
    REGISTRY_DESCRIPTOR,
};
pub use storage::Registry;
pub use types::{CallerContext, RegistryEntry};
