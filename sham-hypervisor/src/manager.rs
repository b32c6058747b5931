//! Entry point: pools, VMs, VM creation and fast cloning.
//!
//! ## Fast clone
//!
//! ```text
//! source VM ──► disks ──► one backed volume per disk, same pool
//!           │               ({clone}-disk{i}.qcow2 over the original)
//!           └─► interfaces ──► MAC cleared
//!                                   │
//!                                   ▼
//!                  define clone (same type and CPUs, not started)
//! ```
//!
//! The clone name and every clone volume name must be free before anything
//! is created. If any step after the first volume creation fails, every
//! volume the workflow created is wiped and deleted before the error is
//! returned.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, ObjectKind, Result};
use crate::machine::VirtualMachine;
use crate::resilient::ResilientConnection;
use crate::storage::{StoragePool, Volume, DEFAULT_VOLUME_FORMAT};
use crate::traits::Connector;
use crate::types::VmSpec;
use crate::xml::{DomainXmlBuilder, MAX_DISK_TARGETS};

/// Bytes per gigabyte as reported by [`Manager::free_memory_gb`].
pub const BYTES_PER_GB: f64 = 1e9;

/// Facade over one hypervisor endpoint.
///
/// Every pool and VM handle returned by the manager shares its connection.
#[derive(Clone)]
pub struct Manager {
    conn: Arc<ResilientConnection>,
}

impl Manager {
    /// Connect to the hypervisor at `uri`.
    pub async fn connect(uri: &str, connector: Arc<dyn Connector>) -> Result<Self> {
        let conn = ResilientConnection::open(uri, connector).await?;
        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// The shared connection handle.
    pub fn connection(&self) -> &Arc<ResilientConnection> {
        &self.conn
    }

    pub async fn list_storage_pools(&self) -> Result<Vec<StoragePool>> {
        let names = self.conn.list_storage_pools().await?;
        Ok(names
            .into_iter()
            .map(|name| StoragePool::new(name, self.conn.clone()))
            .collect())
    }

    /// Find a storage pool by name. Returns `None` if it does not exist.
    pub async fn find_pool(&self, name: &str) -> Result<Option<StoragePool>> {
        let names = self.conn.list_storage_pools().await?;
        Ok(names
            .into_iter()
            .find(|n| n == name)
            .map(|n| StoragePool::new(n, self.conn.clone())))
    }

    /// All defined domains, running or not.
    ///
    /// A domain undefined between listing and lookup is skipped.
    pub async fn list_vms(&self) -> Result<Vec<VirtualMachine>> {
        let names = self.conn.list_domains().await?;

        let mut vms = Vec::with_capacity(names.len());
        for name in names {
            match VirtualMachine::load(&name, self.conn.clone()).await {
                Ok(vm) => vms.push(vm),
                Err(err) if err.is_not_found() => {
                    debug!(vm = %name, "Domain disappeared while listing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(vms)
    }

    /// Find a VM by name. Returns `None` if it does not exist.
    pub async fn find_vm(&self, name: &str) -> Result<Option<VirtualMachine>> {
        match VirtualMachine::load(name, self.conn.clone()).await {
            Ok(vm) => Ok(Some(vm)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Free host memory in decimal gigabytes (bytes / 1e9).
    pub async fn free_memory_gb(&self) -> Result<f64> {
        let bytes = self.conn.free_memory().await?;
        Ok(bytes as f64 / BYTES_PER_GB)
    }

    /// Define a new domain and return its handle. The domain is not started.
    ///
    /// `spec` is validated before anything is submitted to the hypervisor.
    /// Fails with `AlreadyExists` if a domain with that name is defined. If
    /// the new domain cannot be read back it is undefined again.
    #[instrument(skip(self, spec), fields(vm = %spec.name))]
    pub async fn create_vm(&self, spec: VmSpec) -> Result<VirtualMachine> {
        info!(
            vcpus = spec.vcpus,
            memory = spec.memory,
            disks = spec.disks.len(),
            interfaces = spec.interfaces.len(),
            "Creating VM"
        );

        let descriptor = DomainXmlBuilder::new(&spec).descriptor()?;
        self.conn.define_domain(&descriptor).await?;

        let vm = match VirtualMachine::load(&spec.name, self.conn.clone()).await {
            Ok(vm) => vm,
            Err(err) => {
                warn!(error = %err, "Defined VM unreadable, undefining it");
                if let Err(e) = self.conn.undefine_domain(&spec.name).await {
                    warn!(error = %e, "Failed to undefine VM");
                }
                if err.is_not_found() {
                    return Err(HypervisorError::CreateFailed(format!(
                        "domain '{}' was not found after define",
                        spec.name
                    )));
                }
                return Err(err);
            }
        };

        info!("VM defined");
        Ok(vm)
    }

    /// Define a copy-on-write clone of `source` named `clone_name`.
    ///
    /// `memory` (KiB) overrides both current and maximum memory; without it
    /// the source's values are kept. The clone is defined but not started.
    #[instrument(skip(self, source), fields(source = %source.name()))]
    pub async fn fast_clone(
        &self,
        source: &VirtualMachine,
        clone_name: &str,
        memory: Option<u64>,
    ) -> Result<VirtualMachine> {
        let disks = source.disks().await?;
        if disks.len() > MAX_DISK_TARGETS {
            return Err(HypervisorError::DeviceNamesExhausted {
                requested: disks.len(),
                available: MAX_DISK_TARGETS,
            });
        }

        if self.find_vm(clone_name).await?.is_some() {
            return Err(HypervisorError::already_exists(ObjectKind::Domain, clone_name));
        }

        let mut targets = Vec::with_capacity(disks.len());
        for (index, disk) in disks.iter().enumerate() {
            let pool = self.pool_of(disk).await?;
            let name = format!("{}-disk{}", clone_name, index);
            let file = format!("{}.{}", name, DEFAULT_VOLUME_FORMAT);
            if pool.find_volume(&file).await?.is_some() {
                return Err(HypervisorError::already_exists(ObjectKind::StorageVolume, file));
            }
            targets.push((pool, name, disk));
        }

        let mut interfaces = source.interfaces()?;
        for nic in &mut interfaces {
            nic.clear_mac();
        }

        let max_memory = memory.map_or_else(|| source.max_memory(), Ok)?;
        let current_memory = memory.map_or_else(|| source.current_memory(), Ok)?;

        info!(clone = %clone_name, disks = disks.len(), "Fast cloning VM");

        let mut created: Vec<Volume> = Vec::with_capacity(disks.len());
        let result = async {
            for (pool, name, disk) in &targets {
                created.push(pool.create_backed_volume(name, disk).await?);
            }

            let spec = VmSpec::new(
                source.domain_type(),
                clone_name,
                source.num_cpus(),
                current_memory,
                max_memory,
            )
            .with_disks(created.clone())
            .with_interfaces(interfaces);

            self.create_vm(spec).await
        }
        .await;

        match result {
            Ok(vm) => {
                info!(clone = %clone_name, "Fast clone complete");
                Ok(vm)
            }
            Err(err) => {
                warn!(clone = %clone_name, error = %err, created = created.len(), "Fast clone failed, rolling back");
                self.rollback_volumes(&created).await;
                Err(err)
            }
        }
    }

    async fn pool_of(&self, volume: &Volume) -> Result<StoragePool> {
        self.find_pool(&volume.pool)
            .await?
            .ok_or_else(|| HypervisorError::not_found(ObjectKind::StoragePool, volume.pool.clone()))
    }

    /// Best-effort removal of volumes created by a failed workflow.
    async fn rollback_volumes(&self, volumes: &[Volume]) {
        for volume in volumes.iter().rev() {
            let pool = StoragePool::new(volume.pool.clone(), self.conn.clone());
            match pool.wipe_and_delete(volume).await {
                Ok(()) => info!(volume = %volume.path, "Rolled back volume"),
                Err(e) => warn!(volume = %volume.path, error = %e, "Failed to roll back volume"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockHypervisor};
    use crate::network::{InterfaceType, NetworkInterface};

    async fn manager(mock: &MockHypervisor) -> Manager {
        let connector = Arc::new(MockConnector::new(mock.clone()));
        Manager::connect("test:///default", connector).await.unwrap()
    }

    #[tokio::test]
    async fn test_find_pool_and_vm() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/images");
        let manager = manager(&mock).await;

        assert_eq!(manager.list_storage_pools().await.unwrap().len(), 1);
        assert!(manager.find_pool("default").await.unwrap().is_some());
        assert!(manager.find_pool("missing").await.unwrap().is_none());
        assert!(manager.find_vm("nonexistent").await.unwrap().is_none());
        assert!(manager.list_vms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_free_memory_is_decimal_gigabytes() {
        let mock = MockHypervisor::new();
        mock.set_free_memory(2_500_000_000);
        let manager = manager(&mock).await;

        let gb = manager.free_memory_gb().await.unwrap();
        assert!((gb - 2.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_create_vm_assigns_mac() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/images");
        mock.add_volume("default", "a.qcow2", "qcow2", 1 << 30);
        let manager = manager(&mock).await;

        let disk = manager
            .find_pool("default")
            .await
            .unwrap()
            .unwrap()
            .find_volume("a.qcow2")
            .await
            .unwrap()
            .unwrap();

        let spec = VmSpec::new("kvm", "vm1", 2, 524288, 1048576)
            .with_disk(disk)
            .with_interface(NetworkInterface::new(InterfaceType::Network, "default", "virtio"));
        let vm = manager.create_vm(spec).await.unwrap();

        assert_eq!(vm.name(), "vm1");
        assert_eq!(vm.current_memory().unwrap(), 524288);
        assert_eq!(vm.max_memory().unwrap(), 1048576);
        let mac = vm.interfaces().unwrap()[0].mac().map(str::to_string).unwrap();
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(manager.list_vms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fast_clone_memory_override() {
        let mock = MockHypervisor::with_demo_inventory();
        let manager = manager(&mock).await;

        let source = manager.list_vms().await.unwrap().remove(0);
        let clone = manager
            .fast_clone(&source, "small", Some(262144))
            .await
            .unwrap();

        assert_eq!(clone.current_memory().unwrap(), 262144);
        assert_eq!(clone.max_memory().unwrap(), 262144);
        assert_eq!(clone.num_cpus(), source.num_cpus());
        assert!(!clone.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_fast_clone_rejects_existing_name() {
        let mock = MockHypervisor::with_demo_inventory();
        let manager = manager(&mock).await;

        let source = manager.list_vms().await.unwrap().remove(0);
        let before = mock.submitted_volume_xmls().len();

        let err = manager
            .fast_clone(&source, source.name(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HypervisorError::AlreadyExists { kind: ObjectKind::Domain, .. }
        ));
        assert_eq!(mock.submitted_volume_xmls().len(), before);
    }

    #[tokio::test]
    async fn test_create_vm_rejects_existing_name() {
        let mock = MockHypervisor::with_demo_inventory();
        let manager = manager(&mock).await;

        let spec = VmSpec::new("kvm", "base", 1, 524288, 524288);
        let err = manager.create_vm(spec).await.unwrap_err();

        assert!(matches!(
            err,
            HypervisorError::AlreadyExists { kind: ObjectKind::Domain, .. }
        ));
        assert!(mock.submitted_domain_xmls().is_empty());
        assert_eq!(manager.find_vm("base").await.unwrap().unwrap().num_cpus(), 2);
    }

    #[tokio::test]
    async fn test_create_vm_undefines_unreadable_domain() {
        let mock = MockHypervisor::new();
        mock.break_lookups("vm1");
        let manager = manager(&mock).await;

        let err = manager
            .create_vm(VmSpec::new("kvm", "vm1", 1, 524288, 524288))
            .await
            .unwrap_err();

        assert!(matches!(err, HypervisorError::OperationFailed(_)));
        assert_eq!(mock.submitted_domain_xmls().len(), 1);
        assert!(!mock.has_domain("vm1"));
    }
}
