//! Network interface types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};
use crate::xml::{InterfaceElement, InterfaceSource, MacElement, ModelElement};

/// How a virtual NIC is connected on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Libvirt virtual network
    Network,
    /// Host bridge
    Bridge,
    /// Macvtap on a host device
    Direct,
    /// Userspace (SLIRP) networking
    User,
    /// Pre-created tap device
    Ethernet,
}

impl InterfaceType {
    /// Get the libvirt interface type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Network => "network",
            InterfaceType::Bridge => "bridge",
            InterfaceType::Direct => "direct",
            InterfaceType::User => "user",
            InterfaceType::Ethernet => "ethernet",
        }
    }

    /// Name of the `<source>` attribute carrying the source for this type.
    pub fn source_attribute(&self) -> Option<&'static str> {
        match self {
            InterfaceType::Network => Some("network"),
            InterfaceType::Bridge => Some("bridge"),
            InterfaceType::Direct => Some("dev"),
            InterfaceType::User | InterfaceType::Ethernet => None,
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "network" => Ok(InterfaceType::Network),
            "bridge" => Ok(InterfaceType::Bridge),
            "direct" => Ok(InterfaceType::Direct),
            "user" => Ok(InterfaceType::User),
            "ethernet" => Ok(InterfaceType::Ethernet),
            other => Err(HypervisorError::XmlError(format!(
                "unsupported interface type '{}'",
                other
            ))),
        }
    }
}

/// One virtual NIC.
///
/// A `None` MAC means "let the hypervisor pick one when the domain is
/// defined"; the `<mac>` element is then left out of the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Connection type
    pub kind: InterfaceType,
    mac: Option<String>,
    /// Network, bridge or host device name, depending on `kind`
    pub source: Option<String>,
    /// Device model (`virtio`, `e1000`, ...)
    pub model: Option<String>,
}

impl NetworkInterface {
    /// Create an interface with an auto-assigned MAC.
    pub fn new(kind: InterfaceType, source: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind,
            mac: None,
            source: Some(source.into()),
            model: Some(model.into()),
        }
    }

    /// Set a fixed MAC address.
    pub fn with_mac(mut self, mac: &str) -> Result<Self> {
        self.set_mac(mac)?;
        Ok(self)
    }

    /// Set a fixed MAC address, normalized to lower case.
    pub fn set_mac(&mut self, mac: &str) -> Result<()> {
        self.mac = Some(normalize_mac(mac)?);
        Ok(())
    }

    /// Drop the MAC so the hypervisor assigns a fresh one.
    pub fn clear_mac(&mut self) {
        self.mac = None;
    }

    /// The fixed MAC address, if any.
    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    /// Build the `<interface>` element.
    pub fn to_element(&self) -> InterfaceElement {
        let source = match (self.kind.source_attribute(), &self.source) {
            (Some(attr), Some(value)) => {
                let mut source = InterfaceSource::default();
                match attr {
                    "network" => source.network = Some(value.clone()),
                    "bridge" => source.bridge = Some(value.clone()),
                    _ => source.dev = Some(value.clone()),
                }
                Some(source)
            }
            _ => None,
        };

        InterfaceElement {
            interface_type: self.kind.as_str().to_string(),
            mac: self.mac.as_ref().map(|address| MacElement {
                address: address.clone(),
            }),
            source,
            model: self.model.as_ref().map(|model_type| ModelElement {
                model_type: model_type.clone(),
            }),
        }
    }

    /// Read an `<interface>` element from a live descriptor.
    pub fn from_element(element: &InterfaceElement) -> Result<Self> {
        let kind: InterfaceType = element.interface_type.parse()?;

        let source = element.source.as_ref().and_then(|s| match kind.source_attribute() {
            Some("network") => s.network.clone(),
            Some("bridge") => s.bridge.clone(),
            Some(_) => s.dev.clone(),
            None => None,
        });

        let mac = element
            .mac
            .as_ref()
            .map(|m| normalize_mac(&m.address))
            .transpose()?;

        Ok(Self {
            kind,
            mac,
            source,
            model: element.model.as_ref().map(|m| m.model_type.clone()),
        })
    }
}

/// Validate a colon-separated MAC address and lower-case it.
pub fn normalize_mac(mac: &str) -> Result<String> {
    let octets: Vec<&str> = mac.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

    if !valid {
        return Err(HypervisorError::InvalidConfig(format!(
            "invalid MAC address '{}'",
            mac
        )));
    }

    Ok(mac.to_ascii_lowercase())
}
