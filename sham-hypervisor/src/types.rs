//! Type definitions for VM creation and status.

use serde::{Deserialize, Serialize};

use crate::network::NetworkInterface;
use crate::storage::Volume;

/// Default unit for `memory`/`currentMemory`.
pub const DEFAULT_MEMORY_UNIT: &str = "KiB";
/// Default guest architecture.
pub const DEFAULT_ARCH: &str = "x86_64";
/// Default emulator binary.
pub const DEFAULT_EMULATOR: &str = "/usr/bin/qemu-system-x86_64";
/// Default OS type (full virtualization).
pub const DEFAULT_OS_TYPE: &str = "hvm";
/// Default boot device.
pub const DEFAULT_BOOT_DEVICE: &str = "hd";

// =============================================================================
// VM CREATION
// =============================================================================

/// Everything needed to define a new domain.
#[derive(Debug, Clone)]
pub struct VmSpec {
    /// Hypervisor backend (`kvm`, `qemu`, `xen`, ...)
    pub domain_type: String,
    /// Domain name
    pub name: String,
    /// Number of virtual CPUs
    pub vcpus: u32,
    /// Current memory, in `memory_unit`
    pub memory: u64,
    /// Maximum memory, in `memory_unit`
    pub max_memory: u64,
    /// Unit for both memory values
    pub memory_unit: String,
    /// Guest architecture
    pub arch: String,
    /// OS type
    pub os_type: String,
    /// Boot device
    pub boot_device: String,
    /// Emulator binary path
    pub emulator: String,
    /// Disks, attached as `vda`, `vdb`, ... in order
    pub disks: Vec<Volume>,
    /// Network interfaces
    pub interfaces: Vec<NetworkInterface>,
}

impl VmSpec {
    /// Create a spec with default unit, arch, emulator and boot settings.
    pub fn new(
        domain_type: impl Into<String>,
        name: impl Into<String>,
        vcpus: u32,
        memory: u64,
        max_memory: u64,
    ) -> Self {
        Self {
            domain_type: domain_type.into(),
            name: name.into(),
            vcpus,
            memory,
            max_memory,
            memory_unit: DEFAULT_MEMORY_UNIT.to_string(),
            arch: DEFAULT_ARCH.to_string(),
            os_type: DEFAULT_OS_TYPE.to_string(),
            boot_device: DEFAULT_BOOT_DEVICE.to_string(),
            emulator: DEFAULT_EMULATOR.to_string(),
            disks: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    /// Add a disk.
    pub fn with_disk(mut self, disk: Volume) -> Self {
        self.disks.push(disk);
        self
    }

    /// Add several disks.
    pub fn with_disks(mut self, disks: Vec<Volume>) -> Self {
        self.disks.extend(disks);
        self
    }

    /// Add a network interface.
    pub fn with_interface(mut self, nic: NetworkInterface) -> Self {
        self.interfaces.push(nic);
        self
    }

    /// Add several network interfaces.
    pub fn with_interfaces(mut self, nics: Vec<NetworkInterface>) -> Self {
        self.interfaces.extend(nics);
        self
    }

    /// Set the memory unit.
    pub fn with_memory_unit(mut self, unit: impl Into<String>) -> Self {
        self.memory_unit = unit.into();
        self
    }

    /// Set the guest architecture.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Set the emulator binary.
    pub fn with_emulator(mut self, emulator: impl Into<String>) -> Self {
        self.emulator = emulator.into();
        self
    }
}

// =============================================================================
// VM STATUS
// =============================================================================

/// Domain state as reported by libvirt (`virDomainState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
    Unknown,
}

impl DomainState {
    /// Map a raw `virDomainState` code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::Shutdown,
            5 => DomainState::Shutoff,
            6 => DomainState::Crashed,
            7 => DomainState::Suspended,
            _ => DomainState::Unknown,
        }
    }

    /// Raw `virDomainState` code (`Unknown` has none and maps to 0).
    pub fn code(&self) -> u32 {
        match self {
            DomainState::NoState | DomainState::Unknown => 0,
            DomainState::Running => 1,
            DomainState::Blocked => 2,
            DomainState::Paused => 3,
            DomainState::Shutdown => 4,
            DomainState::Shutoff => 5,
            DomainState::Crashed => 6,
            DomainState::Suspended => 7,
        }
    }

    /// Whether the domain may still be using its disks.
    ///
    /// Only shut off, crashed and no-state domains are inactive. An unknown
    /// state counts as active.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            DomainState::NoState | DomainState::Shutoff | DomainState::Crashed
        )
    }
}

impl Default for DomainState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Serializable snapshot of a VM's facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSummary {
    pub name: String,
    pub domain_type: String,
    /// Maximum memory (KiB)
    pub max_memory: u64,
    /// Current memory (KiB)
    pub current_memory: u64,
    pub num_cpus: u32,
    pub running: bool,
}
