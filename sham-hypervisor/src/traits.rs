//! The hypervisor operations this crate relies on.
//!
//! Instead of forwarding arbitrary calls to the client library, the facade
//! talks to the hypervisor only through [`HypervisorConnection`], so each
//! operation can be given its own retry policy in
//! [`ResilientConnection`](crate::resilient::ResilientConnection).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A storage volume as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVolume {
    /// Name of the owning storage pool
    pub pool: String,
    pub name: String,
    pub key: String,
    pub path: String,
    /// Volume descriptor XML
    pub xml: String,
}

/// One open connection to a hypervisor endpoint.
///
/// Lookups of objects that do not exist must fail with
/// [`HypervisorError::NotFound`](crate::HypervisorError::NotFound); any other
/// failure is treated as a connection-level fault.
#[async_trait]
pub trait HypervisorConnection: Send + Sync {
    // =========================================================================
    // Storage
    // =========================================================================

    /// Names of all storage pools.
    async fn list_storage_pools(&self) -> Result<Vec<String>>;

    /// Names of the volumes in a pool.
    async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>>;

    /// Look up a volume by name within a pool.
    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<RawVolume>;

    /// Look up a volume, and its owning pool, by file path.
    async fn lookup_volume_by_path(&self, path: &str) -> Result<RawVolume>;

    /// Create a volume from a descriptor.
    async fn create_volume(&self, pool: &str, xml: &str) -> Result<()>;

    /// Overwrite a volume's data.
    async fn wipe_volume(&self, pool: &str, name: &str) -> Result<()>;

    /// Delete a volume.
    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()>;

    // =========================================================================
    // Domains
    // =========================================================================

    /// Names of all domains, running or not.
    async fn list_domains(&self) -> Result<Vec<String>>;

    /// Current descriptor of a domain.
    async fn domain_xml(&self, name: &str) -> Result<String>;

    /// Define (persist, without starting) a domain from a descriptor.
    async fn define_domain(&self, xml: &str) -> Result<()>;

    /// Start a defined domain.
    async fn start_domain(&self, name: &str) -> Result<()>;

    /// Forcibly stop a domain.
    async fn destroy_domain(&self, name: &str) -> Result<()>;

    /// Remove a domain's configuration.
    async fn undefine_domain(&self, name: &str) -> Result<()>;

    /// Raw `virDomainState` code.
    async fn domain_state(&self, name: &str) -> Result<u32>;

    // =========================================================================
    // Host
    // =========================================================================

    /// Free host memory in bytes.
    async fn free_memory(&self) -> Result<u64>;
}

/// Opens connections to a hypervisor URI.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Arc<dyn HypervisorConnection>>;
}
