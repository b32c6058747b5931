//! In-memory hypervisor for testing and development.
//!
//! [`MockHypervisor`] keeps pools, volumes and domains in memory and behaves
//! like libvirt where the facade depends on it: unknown names fail with
//! not-found errors, defined domains start shut off, and interfaces defined
//! without a MAC get a `52:54:00:xx:xx:xx` address.
//!
//! Faults can be injected to exercise the retry layer, and every descriptor
//! the hypervisor accepted is recorded so tests can inspect what was sent.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{HypervisorError, ObjectKind, Result};
use crate::traits::{Connector, HypervisorConnection, RawVolume};
use crate::types::DomainState;
use crate::xml::{
    CapacityElement, DomainDescriptor, FormatElement, MacElement, VolumeDescriptor, VolumeTarget,
};

/// Free memory reported by a fresh mock: 16 GB.
const DEFAULT_FREE_MEMORY: u64 = 16_000_000_000;

const DEMO_POOL_DIR: &str = "/var/lib/libvirt/images";

const DEMO_DOMAIN_XML: &str = r#"<domain type='kvm'>
  <name>base</name>
  <uuid>6f1c9a3e-2b7d-4c1e-9a55-0d8e4f3b2a10</uuid>
  <memory unit='KiB'>2097152</memory>
  <currentMemory unit='KiB'>2097152</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64'>hvm</type>
    <boot dev='hd'/>
  </os>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/base.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='disk'>
      <driver name='qemu' type='raw'/>
      <source file='/var/lib/libvirt/images/base-data.img'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:12:34:56'/>
      <source network='default'/>
      <model type='virtio'/>
    </interface>
    <video>
      <model type='cirrus' vram='9216' heads='1'/>
    </video>
    <graphics type='vnc' port='-1' autoport='yes'/>
  </devices>
</domain>"#;

#[derive(Default)]
struct MockState {
    pools: BTreeMap<String, MockPool>,
    domains: BTreeMap<String, MockDomain>,
    free_memory: u64,
    faults: Faults,
    rejected_volumes: HashSet<String>,
    rejected_domains: HashSet<String>,
    broken_lookups: HashSet<String>,
    wiped: HashSet<(String, String)>,
    submitted_volumes: Vec<String>,
    submitted_domains: Vec<String>,
}

struct MockPool {
    dir: String,
    volumes: BTreeMap<String, VolumeDescriptor>,
}

struct MockDomain {
    descriptor: DomainDescriptor,
    state: DomainState,
}

#[derive(Default)]
struct Faults {
    fail_next: u32,
    fail_always: bool,
    fail_after_next: bool,
    fail_after_create: bool,
}

/// In-memory hypervisor state, shared by every clone and connection.
#[derive(Clone)]
pub struct MockHypervisor {
    state: Arc<RwLock<MockState>>,
}

impl MockHypervisor {
    /// Create an empty hypervisor.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState {
                free_memory: DEFAULT_FREE_MEMORY,
                ..Default::default()
            })),
        }
    }

    /// A hypervisor with a `default` pool and a shut-off `base` VM with two
    /// disks and one interface.
    pub fn with_demo_inventory() -> Self {
        info!("Creating mock hypervisor with demo inventory");

        let mock = Self::new();
        mock.add_pool("default", DEMO_POOL_DIR);
        mock.add_volume("default", "base.qcow2", "qcow2", 10 * 1024 * 1024 * 1024);
        mock.add_volume("default", "base-data.img", "raw", 2 * 1024 * 1024 * 1024);

        if let Err(e) = mock.add_domain(DEMO_DOMAIN_XML) {
            warn!(error = %e, "Failed to load demo domain");
            debug_assert!(false, "demo domain XML does not parse: {}", e);
        }
        mock
    }

    fn lock(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Add an empty storage pool whose volumes live under `dir`.
    pub fn add_pool(&self, name: &str, dir: &str) {
        self.lock().pools.insert(
            name.to_string(),
            MockPool {
                dir: dir.trim_end_matches('/').to_string(),
                volumes: BTreeMap::new(),
            },
        );
    }

    /// Add a volume to an existing pool. Ignored if the pool does not exist.
    pub fn add_volume(&self, pool: &str, name: &str, format: &str, capacity: u64) {
        let mut state = self.lock();
        if let Some(pool) = state.pools.get_mut(pool) {
            let path = format!("{}/{}", pool.dir, name);
            pool.volumes.insert(
                name.to_string(),
                VolumeDescriptor {
                    name: name.to_string(),
                    key: Some(path.clone()),
                    capacity: CapacityElement {
                        unit: Some("bytes".to_string()),
                        value: capacity,
                    },
                    target: Some(VolumeTarget {
                        path: Some(path),
                        format: Some(FormatElement::new(format)),
                    }),
                    backing_store: None,
                },
            );
        }
    }

    /// Add a shut-off domain from its XML, bypassing the submission log.
    pub fn add_domain(&self, xml: &str) -> Result<()> {
        let descriptor = DomainDescriptor::from_xml(xml)?;
        self.lock().domains.insert(
            descriptor.name.clone(),
            MockDomain {
                descriptor,
                state: DomainState::Shutoff,
            },
        );
        Ok(())
    }

    /// Replace a domain's descriptor in place, as an out-of-band edit would.
    pub fn replace_domain_xml(&self, name: &str, xml: &str) -> Result<()> {
        let descriptor = DomainDescriptor::from_xml(xml)?;
        let mut state = self.lock();
        let domain = state
            .domains
            .get_mut(name)
            .ok_or_else(|| HypervisorError::not_found(ObjectKind::Domain, name))?;
        domain.descriptor = descriptor;
        Ok(())
    }

    /// Force a domain into `state`. Ignored for unknown domains.
    pub fn set_state(&self, name: &str, state: DomainState) {
        if let Some(domain) = self.lock().domains.get_mut(name) {
            domain.state = state;
        }
    }

    pub fn set_free_memory(&self, bytes: u64) {
        self.lock().free_memory = bytes;
    }

    pub fn has_domain(&self, name: &str) -> bool {
        self.lock().domains.contains_key(name)
    }

    pub fn has_volume(&self, pool: &str, name: &str) -> bool {
        self.lock()
            .pools
            .get(pool)
            .map_or(false, |p| p.volumes.contains_key(name))
    }

    /// Whether a volume has been wiped, even if it was deleted since.
    pub fn was_wiped(&self, pool: &str, name: &str) -> bool {
        self.lock()
            .wiped
            .contains(&(pool.to_string(), name.to_string()))
    }

    /// Names of the volumes in a pool, sorted.
    pub fn volume_names(&self, pool: &str) -> Vec<String> {
        self.lock()
            .pools
            .get(pool)
            .map(|p| p.volumes.keys().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Fault injection and inspection
    // =========================================================================

    /// Fail the next `n` calls with a connection fault, without effect.
    pub fn fail_next_calls(&self, n: u32) {
        self.lock().faults.fail_next = n;
    }

    /// Fail every call with a connection fault until turned off.
    pub fn fail_always(&self, fail: bool) {
        self.lock().faults.fail_always = fail;
    }

    /// Let the next call take effect, then report a connection fault anyway.
    pub fn fail_after_next_call(&self) {
        self.lock().faults.fail_after_next = true;
    }

    /// Let the next volume create or domain define take effect, then report
    /// a connection fault anyway. Other calls are unaffected.
    pub fn fail_after_next_create(&self) {
        self.lock().faults.fail_after_create = true;
    }

    /// Make lookups of the named volume or domain fail with a non-not-found
    /// error whenever it exists. Lookups of a missing object still report
    /// not-found.
    pub fn break_lookups(&self, name: &str) {
        self.lock().broken_lookups.insert(name.to_string());
    }

    /// Make every attempt to create the named volume fail.
    pub fn reject_volume(&self, name: &str) {
        self.lock().rejected_volumes.insert(name.to_string());
    }

    /// Make every attempt to define the named domain fail.
    pub fn reject_domain(&self, name: &str) {
        self.lock().rejected_domains.insert(name.to_string());
    }

    /// Volume descriptors accepted by `create_volume`, in order.
    pub fn submitted_volume_xmls(&self) -> Vec<String> {
        self.lock().submitted_volumes.clone()
    }

    /// Domain descriptors accepted by `define_domain`, in order.
    pub fn submitted_domain_xmls(&self) -> Vec<String> {
        self.lock().submitted_domains.clone()
    }

    /// The last accepted descriptor for the named domain.
    pub fn submitted_domain_xml(&self, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .submitted_domains
            .iter()
            .rev()
            .find(|xml| {
                DomainDescriptor::from_xml(xml)
                    .map(|d| d.name == name)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Run one hypervisor call against the state, applying injected faults.
    fn call<T>(&self, f: impl FnOnce(&mut MockState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| HypervisorError::Internal("Lock poisoned".to_string()))?;

        if state.faults.fail_always {
            return Err(connection_lost());
        }
        if state.faults.fail_next > 0 {
            state.faults.fail_next -= 1;
            return Err(connection_lost());
        }

        let fail_after = std::mem::take(&mut state.faults.fail_after_next);
        let result = f(&mut *state)?;

        if fail_after {
            return Err(connection_lost());
        }
        Ok(result)
    }
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn pool(&self, name: &str) -> Result<&MockPool> {
        self.pools
            .get(name)
            .ok_or_else(|| HypervisorError::not_found(ObjectKind::StoragePool, name))
    }

    fn pool_mut(&mut self, name: &str) -> Result<&mut MockPool> {
        self.pools
            .get_mut(name)
            .ok_or_else(|| HypervisorError::not_found(ObjectKind::StoragePool, name))
    }

    fn check_lookup(&self, name: &str) -> Result<()> {
        if self.broken_lookups.contains(name) {
            return Err(HypervisorError::OperationFailed(format!(
                "lookup of '{}' failed",
                name
            )));
        }
        Ok(())
    }

    /// Outcome of a create or define that took effect.
    fn created(&mut self) -> Result<()> {
        if std::mem::take(&mut self.faults.fail_after_create) {
            return Err(connection_lost());
        }
        Ok(())
    }

    fn domain_mut(&mut self, name: &str) -> Result<&mut MockDomain> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| HypervisorError::not_found(ObjectKind::Domain, name))
    }
}

fn connection_lost() -> HypervisorError {
    HypervisorError::ConnectionFailed("mock connection lost".to_string())
}

fn raw_volume(pool: &str, descriptor: &VolumeDescriptor) -> Result<RawVolume> {
    let path = descriptor
        .target
        .as_ref()
        .and_then(|t| t.path.clone())
        .unwrap_or_default();

    Ok(RawVolume {
        pool: pool.to_string(),
        name: descriptor.name.clone(),
        key: descriptor.key.clone().unwrap_or_else(|| path.clone()),
        path,
        xml: descriptor.to_xml()?,
    })
}

fn generate_mac_address() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

#[async_trait]
impl HypervisorConnection for MockHypervisor {
    async fn list_storage_pools(&self) -> Result<Vec<String>> {
        self.call(|state| Ok(state.pools.keys().cloned().collect()))
    }

    async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>> {
        self.call(|state| Ok(state.pool(pool)?.volumes.keys().cloned().collect()))
    }

    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<RawVolume> {
        self.call(|state| {
            let descriptor = state
                .pool(pool)?
                .volumes
                .get(name)
                .ok_or_else(|| HypervisorError::not_found(ObjectKind::StorageVolume, name))?;
            state.check_lookup(name)?;
            raw_volume(pool, descriptor)
        })
    }

    async fn lookup_volume_by_path(&self, path: &str) -> Result<RawVolume> {
        self.call(|state| {
            for (pool_name, pool) in &state.pools {
                let found = pool.volumes.values().find(|v| {
                    v.target.as_ref().and_then(|t| t.path.as_deref()) == Some(path)
                });
                if let Some(descriptor) = found {
                    return raw_volume(pool_name, descriptor);
                }
            }
            Err(HypervisorError::not_found(ObjectKind::StorageVolume, path))
        })
    }

    async fn create_volume(&self, pool: &str, xml: &str) -> Result<()> {
        let mut descriptor = VolumeDescriptor::from_xml(xml)?;

        self.call(|state| {
            if state.rejected_volumes.contains(&descriptor.name) {
                return Err(HypervisorError::CreateFailed(format!(
                    "volume '{}' rejected",
                    descriptor.name
                )));
            }

            let pool_state = state.pool_mut(pool)?;
            if pool_state.volumes.contains_key(&descriptor.name) {
                return Err(HypervisorError::CreateFailed(format!(
                    "storage volume '{}' exists already",
                    descriptor.name
                )));
            }

            let path = format!("{}/{}", pool_state.dir, descriptor.name);
            let format = descriptor
                .format()
                .map(FormatElement::new)
                .unwrap_or_else(|| FormatElement::new("raw"));
            descriptor.key = Some(path.clone());
            descriptor.target = Some(VolumeTarget {
                path: Some(path),
                format: Some(format),
            });

            debug!(pool = %pool, volume = %descriptor.name, "Mock volume created");
            pool_state
                .volumes
                .insert(descriptor.name.clone(), descriptor.clone());
            state.submitted_volumes.push(xml.to_string());
            state.created()
        })
    }

    async fn wipe_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.call(|state| {
            if !state.pool(pool)?.volumes.contains_key(name) {
                return Err(HypervisorError::not_found(ObjectKind::StorageVolume, name));
            }
            state.wiped.insert((pool.to_string(), name.to_string()));
            Ok(())
        })
    }

    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.call(|state| {
            state
                .pool_mut(pool)?
                .volumes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| HypervisorError::not_found(ObjectKind::StorageVolume, name))
        })
    }

    async fn list_domains(&self) -> Result<Vec<String>> {
        self.call(|state| Ok(state.domains.keys().cloned().collect()))
    }

    async fn domain_xml(&self, name: &str) -> Result<String> {
        self.call(|state| {
            let xml = state.domain_mut(name)?.descriptor.to_xml()?;
            state.check_lookup(name)?;
            Ok(xml)
        })
    }

    async fn define_domain(&self, xml: &str) -> Result<()> {
        let mut descriptor = DomainDescriptor::from_xml(xml)?;

        self.call(|state| {
            if state.rejected_domains.contains(&descriptor.name) {
                return Err(HypervisorError::CreateFailed(format!(
                    "domain '{}' rejected",
                    descriptor.name
                )));
            }

            // Redefining an existing domain requires its UUID
            if let Some(existing) = state.domains.get(&descriptor.name) {
                if descriptor.uuid.is_none() || descriptor.uuid != existing.descriptor.uuid {
                    return Err(HypervisorError::CreateFailed(format!(
                        "domain '{}' already exists with uuid {}",
                        descriptor.name,
                        existing.descriptor.uuid.as_deref().unwrap_or("-")
                    )));
                }
            }

            for nic in &mut descriptor.devices.interfaces {
                if nic.mac.is_none() {
                    nic.mac = Some(MacElement {
                        address: generate_mac_address(),
                    });
                }
            }
            if descriptor.uuid.is_none() {
                descriptor.uuid = Some(uuid::Uuid::new_v4().to_string());
            }

            let state_now = state
                .domains
                .get(&descriptor.name)
                .map_or(DomainState::Shutoff, |d| d.state);

            debug!(vm = %descriptor.name, "Mock domain defined");
            state.domains.insert(
                descriptor.name.clone(),
                MockDomain {
                    descriptor: descriptor.clone(),
                    state: state_now,
                },
            );
            state.submitted_domains.push(xml.to_string());
            state.created()
        })
    }

    async fn start_domain(&self, name: &str) -> Result<()> {
        self.call(|state| {
            let domain = state.domain_mut(name)?;
            if domain.state == DomainState::Running {
                return Err(HypervisorError::StartFailed(format!(
                    "domain '{}' is already active",
                    name
                )));
            }
            domain.state = DomainState::Running;
            Ok(())
        })
    }

    async fn destroy_domain(&self, name: &str) -> Result<()> {
        self.call(|state| {
            let domain = state.domain_mut(name)?;
            if !matches!(
                domain.state,
                DomainState::Running | DomainState::Paused | DomainState::Blocked
            ) {
                return Err(HypervisorError::StopFailed(format!(
                    "domain '{}' is not running",
                    name
                )));
            }
            domain.state = DomainState::Shutoff;
            Ok(())
        })
    }

    async fn undefine_domain(&self, name: &str) -> Result<()> {
        self.call(|state| {
            state
                .domains
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| HypervisorError::not_found(ObjectKind::Domain, name))
        })
    }

    async fn domain_state(&self, name: &str) -> Result<u32> {
        self.call(|state| Ok(state.domain_mut(name)?.state.code()))
    }

    async fn free_memory(&self) -> Result<u64> {
        self.call(|state| Ok(state.free_memory))
    }
}

/// Opens connections to a [`MockHypervisor`].
///
/// Every open hands out a distinct connection over the same state, so the
/// retry layer can tell a replaced connection from the failed one.
pub struct MockConnector {
    hypervisor: MockHypervisor,
    opens: AtomicU64,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn new(hypervisor: MockHypervisor) -> Self {
        Self {
            hypervisor,
            opens: AtomicU64::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail.
    pub fn refuse_opens(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, uri: &str) -> Result<Arc<dyn HypervisorConnection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(HypervisorError::ConnectionFailed(format!(
                "failed to connect to {}",
                uri
            )));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!(uri = %uri, "Opened mock connection");
        Ok(Arc::new(self.hypervisor.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/images/");

        mock.create_volume(
            "default",
            "<volume><name>a.qcow2</name><capacity unit='bytes'>1024</capacity></volume>",
        )
        .await
        .unwrap();

        let raw = mock.lookup_volume_by_path("/images/a.qcow2").await.unwrap();
        assert_eq!(raw.pool, "default");
        assert_eq!(raw.name, "a.qcow2");

        let err = mock
            .create_volume(
                "default",
                "<volume><name>a.qcow2</name><capacity>1</capacity></volume>",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::CreateFailed(_)));

        mock.wipe_volume("default", "a.qcow2").await.unwrap();
        mock.delete_volume("default", "a.qcow2").await.unwrap();
        assert!(mock.lookup_volume("default", "a.qcow2").await.unwrap_err().is_not_found());
        assert!(mock.was_wiped("default", "a.qcow2"));
    }

    #[tokio::test]
    async fn test_define_assigns_mac_and_uuid() {
        let mock = MockHypervisor::new();
        mock.define_domain(
            "<domain type='kvm'><name>vm</name><memory>1024</memory><vcpu>1</vcpu>\
             <os><type>hvm</type></os>\
             <devices><interface type='network'><source network='default'/></interface></devices>\
             </domain>",
        )
        .await
        .unwrap();

        let descriptor = DomainDescriptor::from_xml(&mock.domain_xml("vm").await.unwrap()).unwrap();
        let mac = &descriptor.devices.interfaces[0].mac.as_ref().unwrap().address;
        assert!(mac.starts_with("52:54:00:"));
        assert!(descriptor.uuid.is_some());
        assert_eq!(mock.domain_state("vm").await.unwrap(), DomainState::Shutoff.code());
        assert!(!mock.submitted_domain_xml("vm").unwrap().contains("<mac"));
    }

    #[tokio::test]
    async fn test_define_rejects_name_collision_without_uuid() {
        let mock = MockHypervisor::with_demo_inventory();
        let xml = |uuid: &str| {
            format!(
                "<domain type='kvm'><name>base</name>{}<memory>1024</memory><vcpu>4</vcpu>\
                 <os><type>hvm</type></os></domain>",
                uuid
            )
        };

        let err = mock.define_domain(&xml("")).await.unwrap_err();
        assert!(matches!(err, HypervisorError::CreateFailed(_)));

        let other = "<uuid>00000000-0000-4000-8000-000000000000</uuid>";
        assert!(mock.define_domain(&xml(other)).await.is_err());
        assert!(mock.submitted_domain_xmls().is_empty());

        let same = "<uuid>6f1c9a3e-2b7d-4c1e-9a55-0d8e4f3b2a10</uuid>";
        mock.define_domain(&xml(same)).await.unwrap();
        let descriptor = DomainDescriptor::from_xml(&mock.domain_xml("base").await.unwrap()).unwrap();
        assert_eq!(descriptor.vcpu.count, 4);
    }

    #[tokio::test]
    async fn test_broken_lookups_only_hit_existing_objects() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/images");
        mock.break_lookups("a.qcow2");

        let err = mock.lookup_volume("default", "a.qcow2").await.unwrap_err();
        assert!(err.is_not_found());

        mock.add_volume("default", "a.qcow2", "qcow2", 1024);
        let err = mock.lookup_volume("default", "a.qcow2").await.unwrap_err();
        assert!(matches!(err, HypervisorError::OperationFailed(_)));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let mock = MockHypervisor::new();

        mock.fail_next_calls(2);
        assert!(mock.list_domains().await.is_err());
        assert!(mock.list_domains().await.is_err());
        assert!(mock.list_domains().await.is_ok());

        mock.add_pool("default", "/images");
        mock.fail_after_next_call();
        let err = mock
            .create_volume(
                "default",
                "<volume><name>b.raw</name><capacity>1</capacity></volume>",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::ConnectionFailed(_)));
        assert!(mock.has_volume("default", "b.raw"));

        mock.fail_after_next_create();
        assert!(mock.list_domains().await.is_ok());
        let err = mock
            .create_volume(
                "default",
                "<volume><name>c.raw</name><capacity>1</capacity></volume>",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::ConnectionFailed(_)));
        assert!(mock.has_volume("default", "c.raw"));
    }

    #[tokio::test]
    async fn test_connector_hands_out_distinct_connections() {
        let connector = MockConnector::new(MockHypervisor::with_demo_inventory());

        let a = connector.open("test:///default").await.unwrap();
        let b = connector.open("test:///default").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(connector.open_count(), 2);
        assert_eq!(a.list_domains().await.unwrap(), vec!["base".to_string()]);

        connector.refuse_opens(true);
        assert!(connector.open("test:///default").await.is_err());
        assert_eq!(connector.open_count(), 2);
    }
}
