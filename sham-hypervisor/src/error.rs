//! Error types for the hypervisor facade.

use std::fmt;

use thiserror::Error;

/// Kind of hypervisor object a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Domain,
    StoragePool,
    StorageVolume,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Domain => "domain",
            ObjectKind::StoragePool => "storage pool",
            ObjectKind::StorageVolume => "storage volume",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// Failed to reach the hypervisor, or the connection dropped mid-call.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// A lookup by name or path found nothing.
    ///
    /// This kind is never retried by the resilient connection and is turned
    /// into `None` by the `find_*` operations.
    #[error("{kind} not found: {name}")]
    NotFound { kind: ObjectKind, name: String },

    /// A create or define was refused because the name is already taken.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: ObjectKind, name: String },

    /// Failed to create a volume or define a domain.
    #[error("Failed to create: {0}")]
    CreateFailed(String),

    /// Failed to start a domain.
    #[error("Failed to start VM: {0}")]
    StartFailed(String),

    /// Failed to stop a domain.
    #[error("Failed to stop VM: {0}")]
    StopFailed(String),

    /// Failed to undefine a domain or delete a volume.
    #[error("Failed to delete: {0}")]
    DeleteFailed(String),

    /// General operation failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Object is in an invalid state for the requested operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// Invalid configuration or argument.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// More disks than there are `vd*` target device names.
    #[error("Cannot attach {requested} disks: only {available} target device names (vda..vdz) exist")]
    DeviceNamesExhausted { requested: usize, available: usize },

    /// XML generation/parsing error.
    #[error("XML error: {0}")]
    XmlError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HypervisorError {
    /// Shorthand for a not-found error.
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        HypervisorError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for an already-exists error.
    pub fn already_exists(kind: ObjectKind, name: impl Into<String>) -> Self {
        HypervisorError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::NotFound { .. })
    }
}

impl From<quick_xml::DeError> for HypervisorError {
    fn from(err: quick_xml::DeError) -> Self {
        HypervisorError::XmlError(err.to_string())
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguishable() {
        let err = HypervisorError::not_found(ObjectKind::Domain, "web-01");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "domain not found: web-01");

        let err = HypervisorError::ConnectionFailed("socket closed".to_string());
        assert!(!err.is_not_found());

        let err = HypervisorError::already_exists(ObjectKind::StorageVolume, "a.qcow2");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "storage volume already exists: a.qcow2");
    }

    #[test]
    fn test_device_exhaustion_message() {
        let err = HypervisorError::DeviceNamesExhausted {
            requested: 27,
            available: 26,
        };
        assert!(err.to_string().contains("27 disks"));
    }
}
