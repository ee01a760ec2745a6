//! The process-wide locator.
//!
//! # Rust Learning Note
//!
//! ## Bootstrap ordering
//!
//! ```rust,ignore
//! lazy_static! {
//!     static ref GLOBAL_CONNECTOR: RwLock<Option<Arc<dyn Connector>>> = RwLock::new(None);
//!     static ref GLOBAL_LOCATOR: ServiceLocator = ServiceLocator::new(..., Arc::new(InstalledConnector), ...);
//! }
//! ```
//!
//! The locator is created on first access and never connects while being
//! created. Its connector reads `GLOBAL_CONNECTOR` each time it is asked to
//! connect, so code may call `wait_for_service` before bootstrap has
//! installed a connector: the wait keeps retrying until
//! [`install_global_connector`] runs.

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::sync::Arc;
use svcmgr_common::{Error, Result};
use svcmgr_registry::ServiceRegistry;
use tracing::{info, warn};

use crate::config::LocatorConfig;
use crate::connector::Connector;
use crate::locator::ServiceLocator;
use crate::manifest::DeclarationManifest;

lazy_static! {
    /// Connector supplied by bootstrap code.
    static ref GLOBAL_CONNECTOR: RwLock<Option<Arc<dyn Connector>>> = RwLock::new(None);

    /// Locator shared by the whole process.
    static ref GLOBAL_LOCATOR: ServiceLocator = ServiceLocator::new(
        global_config(),
        Arc::new(InstalledConnector),
        global_manifest(),
    );
}

/// Supplies the transport of the process-wide locator.
///
/// Replaces any previously installed connector. Once the locator has
/// connected it keeps that transport.
pub fn install_global_connector(connector: Arc<dyn Connector>) {
    let previous = GLOBAL_CONNECTOR.write().replace(connector);
    if previous.is_some() {
        warn!("Replaced the installed registry connector");
    } else {
        info!("Registry connector installed");
    }
}

impl ServiceLocator {
    /// The process-wide locator, created on first use.
    ///
    /// Configured from the environment (see [`LocatorConfig::from_env`]).
    pub fn global() -> &'static ServiceLocator {
        &GLOBAL_LOCATOR
    }
}

struct InstalledConnector;

#[async_trait]
impl Connector for InstalledConnector {
    async fn connect(&self) -> Result<Arc<dyn ServiceRegistry>> {
        // Clone out so the lock is not held across the connect
        let connector = GLOBAL_CONNECTOR
            .read()
            .clone()
            .ok_or_else(|| Error::transport("No registry connector installed yet"))?;
        connector.connect().await
    }
}

fn global_config() -> LocatorConfig {
    let config = LocatorConfig::from_env();
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            warn!("Invalid locator configuration from environment, using defaults: {:#}", e);
            LocatorConfig::default()
        }
    }
}

fn global_manifest() -> DeclarationManifest {
    let config = LocatorConfig::from_env();
    let Some(path) = config.manifest_path else {
        return DeclarationManifest::new();
    };

    match DeclarationManifest::load_from_file(&path) {
        Ok(manifest) => {
            info!(
                "Loaded declaration manifest {} ({} interfaces)",
                path.display(),
                manifest.len()
            );
            manifest
        }
        Err(e) => {
            warn!("Ignoring declaration manifest {}: {:#}", path.display(), e);
            DeclarationManifest::new()
        }
    }
}
