//! Storage pools and volumes.
//!
//! A [`StoragePool`] is a handle bound to the manager's shared connection;
//! the [`Volume`]s it returns are plain values.
//!
//! ## Copy-on-write volumes
//!
//! [`StoragePool::create_backed_volume`] does not copy any data: the new
//! volume is a delta layer whose backing store is the original file.
//! Deleting the backing volume while a derived volume still exists corrupts
//! the derived volume.

mod types;

pub use types::*;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::resilient::ResilientConnection;
use crate::xml::{BackingStore, CapacityElement, FormatElement, VolumeDescriptor, VolumeTarget};

/// Format used by [`StoragePool::create_backed_volume`].
pub const DEFAULT_VOLUME_FORMAT: &str = "qcow2";

/// Handle to one hypervisor storage pool.
#[derive(Clone)]
pub struct StoragePool {
    name: String,
    conn: Arc<ResilientConnection>,
}

impl StoragePool {
    pub(crate) fn new(name: impl Into<String>, conn: Arc<ResilientConnection>) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of volumes currently in the pool.
    pub async fn volume_count(&self) -> Result<usize> {
        Ok(self.conn.list_volume_names(&self.name).await?.len())
    }

    /// All volumes currently in the pool.
    ///
    /// A volume removed between listing and lookup is skipped.
    #[instrument(skip(self), fields(pool = %self.name))]
    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let names = self.conn.list_volume_names(&self.name).await?;

        let mut volumes = Vec::with_capacity(names.len());
        for name in names {
            match self.conn.lookup_volume(&self.name, &name).await {
                Ok(raw) => volumes.push(Volume::from_raw(&raw)?),
                Err(err) if err.is_not_found() => {
                    debug!(volume = %name, "Volume disappeared while listing");
                }
                Err(err) => return Err(err),
            }
        }

        debug!(count = volumes.len(), "Listed volumes");
        Ok(volumes)
    }

    /// Look up a volume by name. Returns `None` if it does not exist.
    #[instrument(skip(self), fields(pool = %self.name))]
    pub async fn find_volume(&self, name: &str) -> Result<Option<Volume>> {
        match self.conn.lookup_volume(&self.name, name).await {
            Ok(raw) => Ok(Some(Volume::from_raw(&raw)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create a qcow2 volume named `{name}.qcow2` backed by `backing`.
    pub async fn create_backed_volume(&self, name: &str, backing: &Volume) -> Result<Volume> {
        self.create_backed_volume_with_format(name, backing, DEFAULT_VOLUME_FORMAT)
            .await
    }

    /// Create a volume named `{name}.{format}` backed by `backing`.
    ///
    /// The new volume has the backing volume's capacity, and its backing
    /// store points at the backing volume's path and format.
    ///
    /// Fails with `AlreadyExists` if the name is taken. If the volume is
    /// created but cannot be read back, it is deleted again before the error
    /// is returned.
    #[instrument(skip(self, backing), fields(pool = %self.name, backing = %backing.path))]
    pub async fn create_backed_volume_with_format(
        &self,
        name: &str,
        backing: &Volume,
        format: &str,
    ) -> Result<Volume> {
        if name.is_empty() || format.is_empty() {
            return Err(HypervisorError::InvalidConfig(
                "volume name and format must not be empty".to_string(),
            ));
        }

        let descriptor = backed_volume_descriptor(name, backing, format);

        info!(volume = %descriptor.name, "Creating backed volume");

        self.conn.create_volume(&self.name, &descriptor).await?;

        let volume = match self.read_back(&descriptor.name).await {
            Ok(volume) => volume,
            Err(err) => {
                warn!(volume = %descriptor.name, error = %err, "Created volume unreadable, deleting it");
                if let Err(e) = self.conn.delete_volume(&self.name, &descriptor.name).await {
                    warn!(volume = %descriptor.name, error = %e, "Failed to delete unreadable volume");
                }
                return Err(err);
            }
        };

        info!(path = %volume.path, "Backed volume created");
        Ok(volume)
    }

    async fn read_back(&self, name: &str) -> Result<Volume> {
        let raw = self.conn.lookup_volume(&self.name, name).await?;
        Volume::from_raw(&raw)
    }

    /// Wipe a volume's data, then delete it.
    #[instrument(skip(self, volume), fields(pool = %self.name, volume = %volume.name))]
    pub async fn wipe_and_delete(&self, volume: &Volume) -> Result<()> {
        self.conn.wipe_volume(&self.name, &volume.name).await?;
        self.conn.delete_volume(&self.name, &volume.name).await?;

        info!("Volume wiped and deleted");
        Ok(())
    }
}

impl fmt::Display for StoragePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePool<Name: {}>", self.name)
    }
}

impl fmt::Debug for StoragePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoragePool").field("name", &self.name).finish()
    }
}

/// Descriptor for a copy-on-write volume over `backing`.
pub fn backed_volume_descriptor(name: &str, backing: &Volume, format: &str) -> VolumeDescriptor {
    VolumeDescriptor {
        name: format!("{}.{}", name, format),
        key: None,
        capacity: CapacityElement {
            unit: Some("bytes".to_string()),
            value: backing.capacity,
        },
        target: Some(VolumeTarget {
            path: None,
            format: Some(FormatElement::new(format)),
        }),
        backing_store: Some(BackingStore {
            path: Some(backing.path.clone()),
            format: Some(FormatElement::new(backing.format.clone())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockHypervisor};

    async fn pool(mock: &MockHypervisor) -> StoragePool {
        let connector = Arc::new(MockConnector::new(mock.clone()));
        let conn = ResilientConnection::open("test:///default", connector)
            .await
            .unwrap();
        StoragePool::new("default", Arc::new(conn))
    }

    #[test]
    fn test_backed_descriptor() {
        let backing = Volume {
            pool: "default".to_string(),
            name: "base.img".to_string(),
            key: "/images/base.img".to_string(),
            path: "/images/base.img".to_string(),
            format: "raw".to_string(),
            capacity: 4096,
            backing: None,
        };

        let desc = backed_volume_descriptor("clone1", &backing, "qcow2");
        assert_eq!(desc.name, "clone1.qcow2");
        assert_eq!(desc.capacity_bytes().unwrap(), 4096);
        assert_eq!(desc.format(), Some("qcow2"));

        let xml = desc.to_xml().unwrap();
        let parsed = VolumeDescriptor::from_xml(&xml).unwrap();
        let store = parsed.backing_store.unwrap();
        assert_eq!(store.path.as_deref(), Some("/images/base.img"));
        assert_eq!(store.format.unwrap().format_type, "raw");
        assert!(xml.contains("<backingStore>"));
    }

    #[tokio::test]
    async fn test_create_backed_volume() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/var/lib/libvirt/images");
        mock.add_volume("default", "base.qcow2", "qcow2", 10_737_418_240);
        let pool = pool(&mock).await;

        let source = pool.find_volume("base.qcow2").await.unwrap().unwrap();
        let clone = pool.create_backed_volume("clone1", &source).await.unwrap();

        assert_eq!(clone.name, "clone1.qcow2");
        assert_eq!(clone.format, "qcow2");
        assert_eq!(clone.capacity, source.capacity);
        assert_eq!(clone.backing.as_ref().unwrap().path, source.path);
        assert_eq!(clone.pool, "default");
    }

    #[tokio::test]
    async fn test_find_volume_absent() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/var/lib/libvirt/images");
        let pool = pool(&mock).await;

        assert!(pool.find_volume("missing.qcow2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete_volumes() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/var/lib/libvirt/images");
        mock.add_volume("default", "a.qcow2", "qcow2", 1024);
        mock.add_volume("default", "b.raw", "raw", 2048);
        let pool = pool(&mock).await;

        let volumes = pool.list_volumes().await.unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(pool.volume_count().await.unwrap(), 2);

        let b = volumes.iter().find(|v| v.name == "b.raw").unwrap();
        pool.wipe_and_delete(b).await.unwrap();

        assert_eq!(pool.volume_count().await.unwrap(), 1);
        assert!(mock.was_wiped("default", "b.raw"));
    }

    #[tokio::test]
    async fn test_create_backed_volume_refuses_taken_name() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/var/lib/libvirt/images");
        mock.add_volume("default", "base.qcow2", "qcow2", 1 << 30);
        mock.add_volume("default", "clone1.qcow2", "qcow2", 42);
        let pool = pool(&mock).await;

        let source = pool.find_volume("base.qcow2").await.unwrap().unwrap();
        let err = pool.create_backed_volume("clone1", &source).await.unwrap_err();

        assert!(matches!(err, HypervisorError::AlreadyExists { .. }));
        let existing = pool.find_volume("clone1.qcow2").await.unwrap().unwrap();
        assert_eq!(existing.capacity, 42);
        assert!(existing.backing.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_created_volume_is_deleted() {
        let mock = MockHypervisor::new();
        mock.add_pool("default", "/var/lib/libvirt/images");
        mock.add_volume("default", "base.qcow2", "qcow2", 1 << 30);
        mock.break_lookups("clone1.qcow2");
        let pool = pool(&mock).await;

        let source = pool.find_volume("base.qcow2").await.unwrap().unwrap();
        let err = pool.create_backed_volume("clone1", &source).await.unwrap_err();

        assert!(matches!(err, HypervisorError::OperationFailed(_)));
        assert_eq!(mock.submitted_volume_xmls().len(), 1);
        assert!(!mock.has_volume("default", "clone1.qcow2"));
    }
}
