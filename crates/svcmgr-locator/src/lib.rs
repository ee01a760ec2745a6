//! # svcmgr Locator
//! 
//! The client-side service locator: the one object a process uses to find,
//! wait for and publish capabilities.
//! 
//! This crate provides:
//! - `ServiceLocator`: cache + diagnostics + lazily connected transport
//! - `ServiceCache`: append-only memoization of successful lookups
//! - `LookupDiagnostics`: windowed, rate-limited lookup latency logging
//! - `DeclarationManifest`: static interface-to-instance declarations
//! - `LocatorConfig`: YAML + environment configuration
//! - A lazily created process-wide locator (`ServiceLocator::global()`)

pub mod cache;
pub mod config;
pub mod connector;
pub mod diagnostics;
pub mod global;
pub mod locator;
pub mod manifest;

// Re-export commonly used items
pub use cache::ServiceCache;
pub use config::LocatorConfig;
pub use connector::{Connector, ContextObjectConnector, StaticConnector};
pub use diagnostics::{
    DiagnosticSink, DiagnosticsThresholds, LookupDiagnostics, LookupSummary, SlowCall,
    TracingSink, WindowSnapshot,
};
pub use global::install_global_connector;
pub use locator::ServiceLocator;
pub use manifest::DeclarationManifest;
