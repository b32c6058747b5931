//! # sham Hypervisor
//!
//! A thin facade over libvirt for storage pools, volumes and VMs, with a
//! copy-on-write fast-clone workflow.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                Manager                  │
//! │ (create_vm, fast_clone, find_vm, ...)   │
//! └──────┬────────────────────────┬─────────┘
//!        ▼                        ▼
//! ┌──────────────┐       ┌─────────────────┐
//! │ StoragePool  │       │ VirtualMachine  │
//! └──────┬───────┘       └────────┬────────┘
//!        └───────────┬────────────┘
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │          ResilientConnection            │
//! │   (reopen and retry once on failure)    │
//! └─────────────────────┬───────────────────┘
//!                       │ HypervisorConnection
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │ LibvirtConnection │     │  MockHypervisor   │
//! │   (via libvirt)   │     │   (in memory)     │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sham_hypervisor::{Manager, MockConnector, MockHypervisor};
//!
//! #[tokio::main]
//! async fn main() -> sham_hypervisor::Result<()> {
//!     let connector = Arc::new(MockConnector::new(MockHypervisor::with_demo_inventory()));
//!     let manager = Manager::connect("test:///default", connector).await?;
//!
//!     if let Some(base) = manager.find_vm("base").await? {
//!         let clone = manager.fast_clone(&base, "base-clone", None).await?;
//!         clone.start().await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod libvirt;
pub mod machine;
pub mod manager;
pub mod mock;
pub mod network;
pub mod resilient;
pub mod storage;
pub mod traits;
pub mod types;
pub mod units;
pub mod xml;

pub use error::{HypervisorError, ObjectKind, Result};
pub use machine::VirtualMachine;
pub use manager::Manager;
pub use mock::{MockConnector, MockHypervisor};
pub use network::{InterfaceType, NetworkInterface};
pub use resilient::ResilientConnection;
pub use storage::{BackingStoreInfo, StoragePool, Volume, DEFAULT_VOLUME_FORMAT};
pub use traits::{Connector, HypervisorConnection, RawVolume};
pub use types::*;

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::{LibvirtConnection, LibvirtConnector};
