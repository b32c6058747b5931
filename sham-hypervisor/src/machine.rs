//! Handle to one defined domain.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::network::NetworkInterface;
use crate::resilient::ResilientConnection;
use crate::storage::{StoragePool, Volume};
use crate::types::{DomainState, VmSummary};
use crate::xml::DomainDescriptor;

/// A domain together with the descriptor it had when the handle was made.
///
/// Memory, CPU, interface and disk facts come from that descriptor and are
/// not re-read from the hypervisor until [`refresh`](Self::refresh) is
/// called. The run state is always queried live.
#[derive(Clone)]
pub struct VirtualMachine {
    name: String,
    descriptor: DomainDescriptor,
    conn: Arc<ResilientConnection>,
}

impl VirtualMachine {
    /// Look up a domain by name and capture its descriptor.
    pub(crate) async fn load(name: &str, conn: Arc<ResilientConnection>) -> Result<Self> {
        let xml = conn.domain_xml(name).await?;
        let descriptor = DomainDescriptor::from_xml(&xml)?;

        Ok(Self {
            name: name.to_string(),
            descriptor,
            conn,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hypervisor domain type (`kvm`, `qemu`, ...).
    pub fn domain_type(&self) -> &str {
        &self.descriptor.domain_type
    }

    /// Current memory in KiB.
    pub fn current_memory(&self) -> Result<u64> {
        self.descriptor.current_memory_kib()
    }

    /// Maximum memory in KiB.
    pub fn max_memory(&self) -> Result<u64> {
        self.descriptor.max_memory_kib()
    }

    pub fn num_cpus(&self) -> u32 {
        self.descriptor.vcpu.count
    }

    /// The descriptor captured for this handle.
    pub fn descriptor(&self) -> &DomainDescriptor {
        &self.descriptor
    }

    /// Network interfaces, in descriptor order.
    pub fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        self.descriptor
            .devices
            .interfaces
            .iter()
            .map(NetworkInterface::from_element)
            .collect()
    }

    /// Disk volumes, in descriptor order.
    ///
    /// Only `device="disk"` entries backed by a file are included; CD-ROMs,
    /// floppies and block-device disks are skipped. Each file is resolved to
    /// its volume and owning pool through the hypervisor.
    pub async fn disks(&self) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();

        for disk in self.descriptor.devices.disks.iter().filter(|d| d.is_disk()) {
            if let Some(path) = disk.source_file() {
                let raw = self.conn.lookup_volume_by_path(path).await?;
                volumes.push(Volume::from_raw(&raw)?);
            }
        }

        Ok(volumes)
    }

    /// Live run state.
    pub async fn state(&self) -> Result<DomainState> {
        let code = self.conn.domain_state(&self.name).await?;
        Ok(DomainState::from_code(code))
    }

    /// `true` only in the running state; paused, crashed and every other
    /// state report `false`.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.state().await? == DomainState::Running)
    }

    /// Start the domain.
    #[instrument(skip(self), fields(vm = %self.name))]
    pub async fn start(&self) -> Result<()> {
        info!("Starting VM");
        self.conn.start_domain(&self.name).await?;
        info!("VM started");
        Ok(())
    }

    /// Forcibly stop the domain, then optionally wipe and delete its disks.
    ///
    /// Disks are only touched after the stop has completed.
    #[instrument(skip(self), fields(vm = %self.name))]
    pub async fn shutdown(&self, delete_disks: bool) -> Result<()> {
        let disks = if delete_disks {
            self.disks().await?
        } else {
            Vec::new()
        };

        info!("Stopping VM");
        self.conn.destroy_domain(&self.name).await?;

        if delete_disks {
            self.remove_disks(&disks).await?;
        }

        info!(disks_deleted = disks.len(), "VM stopped");
        Ok(())
    }

    /// Undefine the domain and wipe and delete all of its disks.
    ///
    /// Fails with [`HypervisorError::InvalidState`] without touching anything
    /// if the domain is active (see [`DomainState::is_active`]). Use
    /// `shutdown(true)` to remove an active domain's storage.
    #[instrument(skip(self), fields(vm = %self.name))]
    pub async fn delete(&self) -> Result<()> {
        let state = self.state().await?;
        if state.is_active() {
            return Err(HypervisorError::InvalidState(format!(
                "VM '{}' is {:?}, stop it before deleting",
                self.name, state
            )));
        }

        let disks = self.disks().await?;

        info!("Deleting VM");
        self.conn.undefine_domain(&self.name).await?;
        self.remove_disks(&disks).await?;

        info!(disks_deleted = disks.len(), "VM deleted");
        Ok(())
    }

    /// Re-read the descriptor from the hypervisor.
    pub async fn refresh(&mut self) -> Result<()> {
        let xml = self.conn.domain_xml(&self.name).await?;
        self.descriptor = DomainDescriptor::from_xml(&xml)?;
        Ok(())
    }

    /// Serializable facts about this VM, including its live run state.
    pub async fn summary(&self) -> Result<VmSummary> {
        Ok(VmSummary {
            name: self.name.clone(),
            domain_type: self.domain_type().to_string(),
            max_memory: self.max_memory()?,
            current_memory: self.current_memory()?,
            num_cpus: self.num_cpus(),
            running: self.is_running().await?,
        })
    }

    async fn remove_disks(&self, disks: &[Volume]) -> Result<()> {
        for disk in disks {
            let pool = StoragePool::new(disk.pool.clone(), self.conn.clone());
            if let Err(e) = pool.wipe_and_delete(disk).await {
                warn!(volume = %disk.path, error = %e, "Failed to remove disk");
                return Err(HypervisorError::DeleteFailed(format!(
                    "disk {}: {}",
                    disk.path, e
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualMachine< {} >", self.name)
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("name", &self.name)
            .field("domain_type", &self.descriptor.domain_type)
            .field("vcpus", &self.descriptor.vcpu.count)
            .finish()
    }
}
