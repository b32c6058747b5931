//! Libvirt connection implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::{Error as VirtError, ErrorNumber};
use virt::storage_pool::StoragePool;
use virt::storage_vol::StorageVol;

use crate::error::{HypervisorError, ObjectKind, Result};
use crate::traits::{Connector, HypervisorConnection, RawVolume};

/// One open libvirt connection.
pub struct LibvirtConnection {
    uri: String,
    connection: Connect,
}

impl LibvirtConnection {
    /// Open a connection to the specified URI.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub fn open(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri))
            .map_err(|e| HypervisorError::ConnectionFailed(e.to_string()))?;

        info!("Connected to libvirt");

        Ok(Self {
            uri: uri.to_string(),
            connection,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn pool(&self, name: &str) -> Result<StoragePool> {
        StoragePool::lookup_by_name(&self.connection, name)
            .map_err(|e| map_lookup_error(e, ObjectKind::StoragePool, name))
    }

    fn volume(&self, pool: &str, name: &str) -> Result<StorageVol> {
        let pool = self.pool(pool)?;
        StorageVol::lookup_by_name(&pool, name)
            .map_err(|e| map_lookup_error(e, ObjectKind::StorageVolume, name))
    }

    fn domain(&self, name: &str) -> Result<Domain> {
        Domain::lookup_by_name(&self.connection, name)
            .map_err(|e| map_lookup_error(e, ObjectKind::Domain, name))
    }
}

/// Map a libvirt error from a name or path lookup.
///
/// Only the "no such object" codes become [`HypervisorError::NotFound`];
/// anything else is a connection-level fault.
fn map_lookup_error(err: VirtError, kind: ObjectKind, name: &str) -> HypervisorError {
    match err.code() {
        ErrorNumber::NoDomain | ErrorNumber::NoStoragePool | ErrorNumber::NoStorageVol => {
            HypervisorError::not_found(kind, name)
        }
        _ => HypervisorError::ConnectionFailed(err.to_string()),
    }
}

fn raw_volume(pool: &StoragePool, vol: &StorageVol) -> Result<RawVolume> {
    let op = |e: VirtError| HypervisorError::OperationFailed(e.to_string());

    Ok(RawVolume {
        pool: pool.get_name().map_err(op)?,
        name: vol.get_name().map_err(op)?,
        key: vol.get_key().map_err(op)?,
        path: vol.get_path().map_err(op)?,
        xml: vol.get_xml_desc(0).map_err(op)?,
    })
}

#[async_trait]
impl HypervisorConnection for LibvirtConnection {
    async fn list_storage_pools(&self) -> Result<Vec<String>> {
        let pools = self
            .connection
            .list_all_storage_pools(0)
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))?;

        pools
            .iter()
            .map(|p| {
                p.get_name()
                    .map_err(|e| HypervisorError::OperationFailed(e.to_string()))
            })
            .collect()
    }

    async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>> {
        self.pool(pool)?
            .list_volumes()
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))
    }

    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<RawVolume> {
        let pool_handle = self.pool(pool)?;
        let vol = StorageVol::lookup_by_name(&pool_handle, name)
            .map_err(|e| map_lookup_error(e, ObjectKind::StorageVolume, name))?;
        raw_volume(&pool_handle, &vol)
    }

    async fn lookup_volume_by_path(&self, path: &str) -> Result<RawVolume> {
        let vol = StorageVol::lookup_by_path(&self.connection, path)
            .map_err(|e| map_lookup_error(e, ObjectKind::StorageVolume, path))?;
        let pool = StoragePool::lookup_by_volume(&vol)
            .map_err(|e| map_lookup_error(e, ObjectKind::StoragePool, path))?;
        raw_volume(&pool, &vol)
    }

    #[instrument(skip(self, xml), fields(pool = %pool))]
    async fn create_volume(&self, pool: &str, xml: &str) -> Result<()> {
        let pool = self.pool(pool)?;

        debug!(xml = %xml, "Creating storage volume");
        StorageVol::create_xml(&pool, xml, 0)
            .map_err(|e| HypervisorError::CreateFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(pool = %pool, volume = %name))]
    async fn wipe_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.volume(pool, name)?
            .wipe(0)
            .map_err(|e| HypervisorError::DeleteFailed(e.to_string()))
    }

    #[instrument(skip(self), fields(pool = %pool, volume = %name))]
    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.volume(pool, name)?
            .delete(0)
            .map_err(|e| HypervisorError::DeleteFailed(e.to_string()))
    }

    async fn list_domains(&self) -> Result<Vec<String>> {
        let domains = self
            .connection
            .list_all_domains(0)
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))?;

        domains
            .iter()
            .map(|d| {
                d.get_name()
                    .map_err(|e| HypervisorError::OperationFailed(e.to_string()))
            })
            .collect()
    }

    async fn domain_xml(&self, name: &str) -> Result<String> {
        self.domain(name)?
            .get_xml_desc(0)
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))
    }

    #[instrument(skip(self, xml))]
    async fn define_domain(&self, xml: &str) -> Result<()> {
        Domain::define_xml(&self.connection, xml)
            .map_err(|e| HypervisorError::CreateFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %name))]
    async fn start_domain(&self, name: &str) -> Result<()> {
        self.domain(name)?
            .create()
            .map_err(|e| HypervisorError::StartFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %name))]
    async fn destroy_domain(&self, name: &str) -> Result<()> {
        self.domain(name)?
            .destroy()
            .map_err(|e| HypervisorError::StopFailed(e.to_string()))
    }

    #[instrument(skip(self), fields(vm = %name))]
    async fn undefine_domain(&self, name: &str) -> Result<()> {
        self.domain(name)?
            .undefine()
            .map_err(|e| HypervisorError::DeleteFailed(e.to_string()))
    }

    async fn domain_state(&self, name: &str) -> Result<u32> {
        let (state, _reason) = self
            .domain(name)?
            .get_state()
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))?;
        Ok(state)
    }

    async fn free_memory(&self) -> Result<u64> {
        self.connection
            .get_free_memory()
            .map_err(|e| HypervisorError::OperationFailed(e.to_string()))
    }
}

/// Opens [`LibvirtConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibvirtConnector;

#[async_trait]
impl Connector for LibvirtConnector {
    async fn open(&self, uri: &str) -> Result<Arc<dyn HypervisorConnection>> {
        let connection = LibvirtConnection::open(uri)?;
        Ok(Arc::new(connection))
    }
}
