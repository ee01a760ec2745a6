use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use svcmgr_binder::{Binder, CapabilityHandle, Parcel, INTERFACE_TRANSACTION, PING_TRANSACTION};
use svcmgr_common::{DumpPriority, ServiceName};
use svcmgr_locator::{ContextObjectConnector, DeclarationManifest, LocatorConfig, ServiceLocator};
use svcmgr_registry::{serve, Registry, ServiceRegistry};

/// svcmgr - inspect declaration manifests and exercise a local registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Declaration manifest path (YAML)
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<String>,

    /// Locator configuration path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration and manifest
    Validate,

    /// Report whether a service name is declared
    Declared {
        name: String,
    },

    /// List the instances declared for an interface
    Instances {
        interface: String,
    },

    /// Publish every declared instance to an in-process registry and resolve
    /// each one back through a locator
    Smoke {
        /// Give up on a resolution after this many milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.debug)?;

    let config = load_config(args.config.as_deref())?;
    let manifest = load_manifest(args.manifest.as_deref(), &config)?;

    match args.command {
        Command::Validate => {
            info!("Configuration and manifest are valid");
            println!(
                "ok: classification={} isolated={} interfaces={}",
                config.classification,
                config.isolated,
                manifest.len()
            );
        }
        Command::Declared { name } => {
            let declared = manifest.is_declared(&ServiceName::from(name.as_str()));
            println!("{}: {}", name, if declared { "declared" } else { "not declared" });
            if !declared {
                std::process::exit(1);
            }
        }
        Command::Instances { interface } => {
            for instance in manifest.declared_instances(&interface) {
                println!("{}", instance);
            }
        }
        Command::Smoke { timeout_ms } => {
            smoke(config, manifest, Duration::from_millis(timeout_ms)).await?;
        }
    }

    Ok(())
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<LocatorConfig> {
    let mut config = match path {
        Some(path) => LocatorConfig::load_from_file(path)?,
        None => LocatorConfig::default(),
    };
    config.apply_overrides_from(|key| std::env::var(key).ok());
    config.validate().context("Invalid locator configuration")?;
    Ok(config)
}

fn load_manifest(path: Option<&str>, config: &LocatorConfig) -> Result<DeclarationManifest> {
    let path = path
        .map(std::path::PathBuf::from)
        .or_else(|| config.manifest_path.clone());

    match path {
        Some(path) => {
            info!("Manifest file: {}", path.display());
            DeclarationManifest::load_from_file(&path)
        }
        None => {
            warn!("No manifest given; nothing is declared");
            Ok(DeclarationManifest::new())
        }
    }
}

/// Stand-in capability published for each declared instance.
struct Placeholder;

#[async_trait]
impl Binder for Placeholder {
    fn descriptor(&self) -> &str {
        "svcmgr.ISmokePlaceholder"
    }

    async fn transact(&self, code: u32, _data: Parcel) -> svcmgr_common::Result<Parcel> {
        let mut reply = Parcel::new();
        match code {
            PING_TRANSACTION => {}
            INTERFACE_TRANSACTION => reply.write(self.descriptor())?,
            _ => return Err(svcmgr_common::Error::unknown_transaction(self.descriptor(), code)),
        }
        Ok(reply)
    }
}

async fn smoke(config: LocatorConfig, manifest: DeclarationManifest, timeout: Duration) -> Result<()> {
    let names = manifest.service_names();
    if names.is_empty() {
        return Err(anyhow!("Manifest declares no instances to publish"));
    }

    let registry: Arc<dyn ServiceRegistry> = Arc::new(Registry::new());
    let authority = serve(registry);
    let forwarder: Arc<dyn Binder> = authority.clone();
    let context = CapabilityHandle::remote(&forwarder);
    let locator = ServiceLocator::new(
        config,
        Arc::new(ContextObjectConnector::new(context)),
        manifest,
    );

    let mut owners = Vec::with_capacity(names.len());
    for name in &names {
        let owner: Arc<dyn Binder> = Arc::new(Placeholder);
        locator
            .add_service(
                name.clone(),
                CapabilityHandle::local(&owner),
                true,
                DumpPriority::DEFAULT,
            )
            .await
            .with_context(|| format!("Failed to publish {}", name))?;
        owners.push(owner);
    }
    info!("Published {} declared instances", owners.len());

    for name in &names {
        let handle = locator
            .wait_for_service_timeout(name.clone(), timeout)
            .await
            .with_context(|| format!("Failed to resolve {}", name))?;
        handle
            .ping()
            .await
            .with_context(|| format!("{} resolved to a dead object", name))?;
        let descriptor = handle.interface_descriptor().await?;
        println!("{} -> {} {}", name, handle.id(), descriptor);
    }

    let listed = locator.list_services().await.context("Failed to list services")?;
    println!("{} services published", listed.len());
    for name in listed {
        println!("  {}", name);
    }

    Ok(())
}
