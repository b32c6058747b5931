//! Storage type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::RawVolume;
use crate::xml::VolumeDescriptor;

/// Format assumed when a volume descriptor declares none.
pub const FALLBACK_VOLUME_FORMAT: &str = "raw";

/// A storage volume, as read from the hypervisor.
///
/// This is a snapshot taken when the volume was looked up; it is not kept in
/// sync with the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Name of the owning storage pool
    pub pool: String,
    /// Volume name
    pub name: String,
    /// Hypervisor-assigned key
    pub key: String,
    /// Path on the host
    pub path: String,
    /// Storage format (`qcow2`, `raw`, ...)
    pub format: String,
    /// Declared capacity in bytes
    pub capacity: u64,
    /// Backing store, for copy-on-write volumes
    pub backing: Option<BackingStoreInfo>,
}

/// The volume a copy-on-write volume derives from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingStoreInfo {
    pub path: String,
    pub format: Option<String>,
}

impl Volume {
    /// Build a volume from the hypervisor's lookup result.
    pub fn from_raw(raw: &RawVolume) -> Result<Self> {
        let descriptor = VolumeDescriptor::from_xml(&raw.xml)?;

        let backing = descriptor.backing_store.as_ref().and_then(|store| {
            store.path.as_ref().map(|path| BackingStoreInfo {
                path: path.clone(),
                format: store.format.as_ref().map(|f| f.format_type.clone()),
            })
        });

        Ok(Self {
            pool: raw.pool.clone(),
            name: raw.name.clone(),
            key: raw.key.clone(),
            path: raw.path.clone(),
            format: descriptor
                .format()
                .unwrap_or(FALLBACK_VOLUME_FORMAT)
                .to_string(),
            capacity: descriptor.capacity_bytes()?,
            backing,
        })
    }

    /// Whether this volume is a copy-on-write layer over another.
    pub fn is_backed(&self) -> bool {
        self.backing.is_some()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Volume<{}>", self.path)
    }
}
