//! # svcmgr Common
//! 
//! Types shared by every svcmgr crate: the error type, service names,
//! dump priorities and the lookup classification used by diagnostics.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, Result, ResultExt};
pub use types::{Classification, DumpPriority, ServiceName, MAX_SERVICE_NAME_LEN};
