//! # sham
//!
//! Command-line front end over the sham hypervisor facade: list storage
//! pools, volumes and VMs, fast-clone a VM onto copy-on-write disks, and
//! start, stop or delete VMs.
//!
//! ## Usage
//! ```bash
//! sham --uri qemu:///system vms
//! sham clone base web-1 --start
//! sham --dev --json show base
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sham_hypervisor::{Connector, Manager, MockConnector, MockHypervisor};
use tracing::{debug, info};

mod cli;
mod commands;
mod config;

use cli::Args;
use config::{Config, HypervisorBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::resolve(args.config.as_deref())?.with_cli_overrides(&args)?;
    config.validate()?;

    // Initialize logging
    sham_common::init_logging_with_format(&config.logging.level, config.logging.format)?;

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.hypervisor.backend,
        uri = %config.hypervisor.uri,
        "sham configured"
    );

    let manager = Manager::connect(&config.hypervisor.uri, connector(&config)?).await?;

    let report = commands::execute(&manager, args.command).await?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_text());
    }

    Ok(())
}

fn connector(config: &Config) -> Result<Arc<dyn Connector>> {
    match config.hypervisor.backend {
        HypervisorBackend::Mock => {
            info!("Using mock hypervisor with demo inventory");
            Ok(Arc::new(MockConnector::new(MockHypervisor::with_demo_inventory())))
        }
        HypervisorBackend::Libvirt => libvirt_connector(),
    }
}

#[cfg(feature = "libvirt")]
fn libvirt_connector() -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(sham_hypervisor::LibvirtConnector))
}

#[cfg(not(feature = "libvirt"))]
fn libvirt_connector() -> Result<Arc<dyn Connector>> {
    anyhow::bail!("libvirt backend requested but not compiled in")
}
