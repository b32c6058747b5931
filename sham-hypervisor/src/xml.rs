//! Typed libvirt descriptors.
//!
//! Volume and domain XML are modelled as serde structs and (de)serialized
//! with quick-xml, so element and attribute names live in one place.
//! Only the parts of the schema this crate reads or writes are modelled;
//! everything else in a live descriptor is ignored on parse.

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};
use crate::types::VmSpec;
use crate::units;

/// Number of `vd*` target device names (`vda`..`vdz`).
pub const MAX_DISK_TARGETS: usize = 26;

/// Target device name for the disk at `index`.
pub fn disk_target_name(index: usize) -> Result<String> {
    if index >= MAX_DISK_TARGETS {
        return Err(HypervisorError::DeviceNamesExhausted {
            requested: index + 1,
            available: MAX_DISK_TARGETS,
        });
    }
    Ok(format!("vd{}", (b'a' + index as u8) as char))
}

fn to_xml<T: Serialize>(value: &T) -> Result<String> {
    quick_xml::se::to_string(value).map_err(HypervisorError::from)
}

// =============================================================================
// STORAGE VOLUMES
// =============================================================================

/// `<volume>` descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "volume")]
pub struct VolumeDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub capacity: CapacityElement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<VolumeTarget>,
    #[serde(rename = "backingStore", default, skip_serializing_if = "Option::is_none")]
    pub backing_store: Option<BackingStore>,
}

impl VolumeDescriptor {
    /// Parse a volume descriptor.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Serialize to libvirt volume XML.
    pub fn to_xml(&self) -> Result<String> {
        to_xml(self)
    }

    /// Declared capacity in bytes.
    pub fn capacity_bytes(&self) -> Result<u64> {
        let unit = self.capacity.unit.as_deref().unwrap_or("bytes");
        units::to_bytes(self.capacity.value, unit)
    }

    /// Storage format (`qcow2`, `raw`, ...), if declared.
    pub fn format(&self) -> Option<&str> {
        self.target
            .as_ref()
            .and_then(|t| t.format.as_ref())
            .map(|f| f.format_type.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityElement {
    #[serde(rename = "@unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "$text")]
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackingStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatElement {
    #[serde(rename = "@type")]
    pub format_type: String,
}

impl FormatElement {
    pub fn new(format_type: impl Into<String>) -> Self {
        Self {
            format_type: format_type.into(),
        }
    }
}

// =============================================================================
// DOMAINS
// =============================================================================

/// `<domain>` descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "domain")]
pub struct DomainDescriptor {
    #[serde(rename = "@type")]
    pub domain_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub memory: MemoryElement,
    #[serde(rename = "currentMemory", default, skip_serializing_if = "Option::is_none")]
    pub current_memory: Option<MemoryElement>,
    pub vcpu: VcpuElement,
    #[serde(default)]
    pub os: OsElement,
    #[serde(default)]
    pub devices: DevicesElement,
}

impl DomainDescriptor {
    /// Parse a domain descriptor.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Serialize to libvirt domain XML.
    pub fn to_xml(&self) -> Result<String> {
        to_xml(self)
    }

    /// Maximum memory in KiB.
    pub fn max_memory_kib(&self) -> Result<u64> {
        self.memory.kib()
    }

    /// Current memory in KiB; falls back to the maximum when not declared.
    pub fn current_memory_kib(&self) -> Result<u64> {
        match &self.current_memory {
            Some(mem) => mem.kib(),
            None => self.memory.kib(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryElement {
    #[serde(rename = "@unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "$text")]
    pub value: u64,
}

impl MemoryElement {
    pub fn new(value: u64, unit: impl Into<String>) -> Self {
        Self {
            unit: Some(unit.into()),
            value,
        }
    }

    /// Size in KiB. Memory without a unit attribute is in KiB.
    pub fn kib(&self) -> Result<u64> {
        units::to_kib(self.value, self.unit.as_deref().unwrap_or("KiB"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcpuElement {
    #[serde(rename = "@placement", default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    #[serde(rename = "$text")]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsElement {
    pub r#type: OsType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot: Vec<BootElement>,
}

impl Default for OsElement {
    fn default() -> Self {
        Self {
            r#type: OsType {
                arch: None,
                machine: None,
                value: "hvm".to_string(),
            },
            boot: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsType {
    #[serde(rename = "@arch", default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(rename = "@machine", default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootElement {
    #[serde(rename = "@dev")]
    pub dev: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator: Option<String>,
    #[serde(rename = "disk", default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskElement>,
    #[serde(rename = "interface", default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceElement>,
    #[serde(rename = "video", default, skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<VideoElement>,
    #[serde(rename = "graphics", default, skip_serializing_if = "Vec::is_empty")]
    pub graphics: Vec<GraphicsElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskElement {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    #[serde(rename = "@device", default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DiskSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DiskTarget>,
}

impl DiskElement {
    /// File-backed virtio disk, as attached by `create_vm`.
    pub fn file(path: impl Into<String>, format: impl Into<String>, dev: impl Into<String>) -> Self {
        Self {
            disk_type: Some("file".to_string()),
            device: Some("disk".to_string()),
            driver: Some(DriverElement {
                name: Some("qemu".to_string()),
                driver_type: Some(format.into()),
            }),
            source: Some(DiskSource {
                file: Some(path.into()),
                dev: None,
            }),
            target: Some(DiskTarget {
                dev: dev.into(),
                bus: Some("virtio".to_string()),
            }),
        }
    }

    /// Whether this is a hard disk (not a cdrom or floppy).
    /// Libvirt treats a missing `device` attribute as `disk`.
    pub fn is_disk(&self) -> bool {
        self.device.as_deref().map_or(true, |d| d == "disk")
    }

    /// Backing file path, for file-based disks.
    pub fn source_file(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.file.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverElement {
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub driver_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSource {
    #[serde(rename = "@file", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "@dev", default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskTarget {
    #[serde(rename = "@dev")]
    pub dev: String,
    #[serde(rename = "@bus", default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// `<interface>` element. The `source` attribute name depends on the
/// interface type, see [`crate::network::InterfaceType::source_attribute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceElement {
    #[serde(rename = "@type")]
    pub interface_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InterfaceSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacElement {
    #[serde(rename = "@address")]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSource {
    #[serde(rename = "@network", default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(rename = "@bridge", default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(rename = "@dev", default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelElement {
    #[serde(rename = "@type")]
    pub model_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoElement {
    pub model: VideoModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoModel {
    #[serde(rename = "@type")]
    pub model_type: String,
    #[serde(rename = "@vram", default, skip_serializing_if = "Option::is_none")]
    pub vram: Option<u32>,
    #[serde(rename = "@heads", default, skip_serializing_if = "Option::is_none")]
    pub heads: Option<u32>,
}

impl Default for VideoElement {
    fn default() -> Self {
        Self {
            model: VideoModel {
                model_type: "cirrus".to_string(),
                vram: Some(9216),
                heads: Some(1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphicsElement {
    #[serde(rename = "@type")]
    pub graphics_type: String,
    #[serde(rename = "@port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(rename = "@autoport", default, skip_serializing_if = "Option::is_none")]
    pub autoport: Option<String>,
}

impl Default for GraphicsElement {
    /// VNC with an auto-assigned port.
    fn default() -> Self {
        Self {
            graphics_type: "vnc".to_string(),
            port: Some(-1),
            autoport: Some("yes".to_string()),
        }
    }
}

// =============================================================================
// DOMAIN BUILDER
// =============================================================================

/// Builder for libvirt domain definitions.
pub struct DomainXmlBuilder<'a> {
    spec: &'a VmSpec,
}

impl<'a> DomainXmlBuilder<'a> {
    pub fn new(spec: &'a VmSpec) -> Self {
        Self { spec }
    }

    /// Validate the VM spec and assemble the domain descriptor.
    pub fn descriptor(&self) -> Result<DomainDescriptor> {
        let spec = self.spec;
        self.validate()?;

        let disks = spec
            .disks
            .iter()
            .enumerate()
            .map(|(i, vol)| Ok(DiskElement::file(&vol.path, &vol.format, disk_target_name(i)?)))
            .collect::<Result<Vec<_>>>()?;

        let interfaces = spec.interfaces.iter().map(|nic| nic.to_element()).collect();

        Ok(DomainDescriptor {
            domain_type: spec.domain_type.clone(),
            name: spec.name.clone(),
            uuid: None,
            memory: MemoryElement::new(spec.max_memory, &spec.memory_unit),
            current_memory: Some(MemoryElement::new(spec.memory, &spec.memory_unit)),
            vcpu: VcpuElement {
                placement: None,
                count: spec.vcpus,
            },
            os: OsElement {
                r#type: OsType {
                    arch: Some(spec.arch.clone()),
                    machine: None,
                    value: spec.os_type.clone(),
                },
                boot: vec![BootElement {
                    dev: spec.boot_device.clone(),
                }],
            },
            devices: DevicesElement {
                emulator: Some(spec.emulator.clone()),
                disks,
                interfaces,
                video: vec![VideoElement::default()],
                graphics: vec![GraphicsElement::default()],
            },
        })
    }

    /// Build the domain XML string.
    pub fn build(&self) -> Result<String> {
        self.descriptor()?.to_xml()
    }

    fn validate(&self) -> Result<()> {
        let spec = self.spec;

        if spec.name.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("domain name is empty".to_string()));
        }
        if spec.domain_type.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("domain type is empty".to_string()));
        }
        if spec.vcpus == 0 {
            return Err(HypervisorError::InvalidConfig("vCPU count must be at least 1".to_string()));
        }
        if units::unit_multiplier(&spec.memory_unit).is_none() {
            return Err(HypervisorError::InvalidConfig(format!(
                "unknown memory unit '{}'",
                spec.memory_unit
            )));
        }
        if spec.memory > spec.max_memory {
            return Err(HypervisorError::InvalidConfig(format!(
                "current memory {} exceeds maximum memory {}",
                spec.memory, spec.max_memory
            )));
        }
        if spec.disks.len() > MAX_DISK_TARGETS {
            return Err(HypervisorError::DeviceNamesExhausted {
                requested: spec.disks.len(),
                available: MAX_DISK_TARGETS,
            });
        }
        if let Some(disk) = spec.disks.iter().find(|d| d.path.is_empty()) {
            return Err(HypervisorError::InvalidConfig(format!(
                "volume {} has no path",
                disk.name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{InterfaceType, NetworkInterface};
    use crate::storage::Volume;

    fn volume(name: &str) -> Volume {
        Volume {
            pool: "default".to_string(),
            name: name.to_string(),
            key: format!("/var/lib/libvirt/images/{}", name),
            path: format!("/var/lib/libvirt/images/{}", name),
            format: "qcow2".to_string(),
            capacity: 10 * 1024 * 1024 * 1024,
            backing: None,
        }
    }

    #[test]
    fn test_target_names_in_order() {
        assert_eq!(disk_target_name(0).unwrap(), "vda");
        assert_eq!(disk_target_name(1).unwrap(), "vdb");
        assert_eq!(disk_target_name(25).unwrap(), "vdz");
        assert!(matches!(
            disk_target_name(26),
            Err(HypervisorError::DeviceNamesExhausted { requested: 27, available: 26 })
        ));
    }

    #[test]
    fn test_basic_domain_generation() {
        let spec = VmSpec::new("kvm", "test-vm", 4, 1048576, 2097152)
            .with_disk(volume("a.qcow2"))
            .with_disk(volume("b.qcow2"))
            .with_disk(volume("c.qcow2"))
            .with_interface(NetworkInterface::new(InterfaceType::Network, "default", "virtio"));

        let xml = DomainXmlBuilder::new(&spec).build().unwrap();

        assert!(xml.starts_with("<domain"));
        assert!(xml.contains("<name>test-vm</name>"));
        assert!(xml.contains("<vcpu>4</vcpu>"));
        assert!(xml.contains("/usr/bin/qemu-system-x86_64"));
        assert!(xml.contains("<currentMemory"));

        let parsed = DomainDescriptor::from_xml(&xml).unwrap();
        assert_eq!(parsed.domain_type, "kvm");
        assert_eq!(parsed.memory.value, 2097152);
        assert_eq!(parsed.memory.unit.as_deref(), Some("KiB"));
        assert_eq!(parsed.current_memory.as_ref().unwrap().value, 1048576);
        assert_eq!(parsed.os.r#type.arch.as_deref(), Some("x86_64"));
        assert_eq!(parsed.os.r#type.value, "hvm");
        assert_eq!(parsed.os.boot[0].dev, "hd");

        let targets: Vec<_> = parsed
            .devices
            .disks
            .iter()
            .map(|d| d.target.as_ref().unwrap().dev.as_str())
            .collect();
        assert_eq!(targets, vec!["vda", "vdb", "vdc"]);

        let disk = &parsed.devices.disks[1];
        assert_eq!(disk.disk_type.as_deref(), Some("file"));
        assert_eq!(disk.source_file(), Some("/var/lib/libvirt/images/b.qcow2"));
        assert_eq!(disk.driver.as_ref().unwrap().driver_type.as_deref(), Some("qcow2"));
        assert_eq!(disk.target.as_ref().unwrap().bus.as_deref(), Some("virtio"));

        assert_eq!(parsed.devices.video, vec![VideoElement::default()]);
        assert_eq!(parsed.devices.graphics, vec![GraphicsElement::default()]);
    }

    #[test]
    fn test_too_many_disks_rejected() {
        let disks = (0..27).map(|i| volume(&format!("d{}.qcow2", i))).collect();
        let spec = VmSpec::new("kvm", "big-vm", 1, 1024, 1024).with_disks(disks);

        let err = DomainXmlBuilder::new(&spec).build().unwrap_err();
        assert!(matches!(err, HypervisorError::DeviceNamesExhausted { requested: 27, .. }));
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let spec = VmSpec::new("kvm", "", 1, 1024, 1024);
        assert!(DomainXmlBuilder::new(&spec).build().is_err());

        let spec = VmSpec::new("kvm", "vm", 0, 1024, 1024);
        assert!(DomainXmlBuilder::new(&spec).build().is_err());

        let spec = VmSpec::new("kvm", "vm", 1, 4096, 1024);
        assert!(DomainXmlBuilder::new(&spec).build().is_err());

        let spec = VmSpec::new("kvm", "vm", 1, 1024, 1024).with_memory_unit("kb");
        assert!(DomainXmlBuilder::new(&spec).build().is_err());
    }

    #[test]
    fn test_parse_live_domain() {
        let xml = r#"<domain type='kvm' id='3'>
  <name>base</name>
  <uuid>2b7e4a1c-9d3f-4c55-8a0e-6f1d2c3b4a59</uuid>
  <memory unit='KiB'>2097152</memory>
  <currentMemory unit='KiB'>1048576</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64' machine='pc-i440fx-2.1'>hvm</type>
    <boot dev='hd'/>
  </os>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/base.qcow2'/>
      <target dev='vda' bus='virtio'/>
      <alias name='virtio-disk0'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <target dev='hdc' bus='ide'/>
      <readonly/>
    </disk>
    <controller type='usb' index='0'/>
    <interface type='bridge'>
      <mac address='52:54:00:ab:cd:ef'/>
      <source bridge='br0'/>
      <target dev='vnet0'/>
      <model type='virtio'/>
    </interface>
    <serial type='pty'>
      <target port='0'/>
    </serial>
    <graphics type='vnc' port='5900' autoport='yes' listen='127.0.0.1'>
      <listen type='address' address='127.0.0.1'/>
    </graphics>
    <video>
      <model type='cirrus' vram='9216' heads='1'/>
    </video>
  </devices>
</domain>"#;

        let desc = DomainDescriptor::from_xml(xml).unwrap();
        assert_eq!(desc.name, "base");
        assert_eq!(desc.vcpu.count, 2);
        assert_eq!(desc.max_memory_kib().unwrap(), 2097152);
        assert_eq!(desc.current_memory_kib().unwrap(), 1048576);
        assert_eq!(desc.devices.disks.len(), 2);
        assert!(desc.devices.disks[0].is_disk());
        assert!(!desc.devices.disks[1].is_disk());
        assert_eq!(desc.devices.disks[1].source_file(), None);

        let nic = &desc.devices.interfaces[0];
        assert_eq!(nic.interface_type, "bridge");
        assert_eq!(nic.mac.as_ref().unwrap().address, "52:54:00:ab:cd:ef");
        assert_eq!(nic.source.as_ref().unwrap().bridge.as_deref(), Some("br0"));
        assert_eq!(desc.devices.graphics[0].port, Some(5900));
    }

    #[test]
    fn test_parse_volume() {
        let xml = r#"<volume type='file'>
  <name>base.qcow2</name>
  <key>/var/lib/libvirt/images/base.qcow2</key>
  <capacity unit='bytes'>10737418240</capacity>
  <allocation unit='bytes'>1395863552</allocation>
  <target>
    <path>/var/lib/libvirt/images/base.qcow2</path>
    <format type='qcow2'/>
    <permissions>
      <mode>0600</mode>
    </permissions>
  </target>
</volume>"#;

        let desc = VolumeDescriptor::from_xml(xml).unwrap();
        assert_eq!(desc.name, "base.qcow2");
        assert_eq!(desc.capacity_bytes().unwrap(), 10737418240);
        assert_eq!(desc.format(), Some("qcow2"));
        assert!(desc.backing_store.is_none());
    }

    #[test]
    fn test_capacity_units_normalized() {
        let xml = "<volume><name>v</name><capacity unit='G'>2</capacity></volume>";
        let desc = VolumeDescriptor::from_xml(xml).unwrap();
        assert_eq!(desc.capacity_bytes().unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(desc.format(), None);
    }
}
