//! Resource specification and observed state.

use serde::{Deserialize, Serialize};

use crate::api::{CreateVmRequest, VmInfo};
use crate::error::ReconcileError;

/// Megabytes per gigabyte on the wire.
pub const MB_PER_GB: u64 = 1024;

/// Desired state of a VM, as supplied by the caller.
///
/// Path resolution for SSH keys happens before a spec is built: the
/// `ssh_public_key` field holds key material, never a file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub vcpus: u32,
    pub memory_gb: u64,
    pub base_image: String,
    pub root_disk_gb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

impl ResourceSpec {
    /// Check the spec before anything is sent to the control plane.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let invalid = |reason: &str| ReconcileError::InvalidSpec {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.base_image.trim().is_empty() {
            return Err(invalid("base_image must not be empty"));
        }
        if self.vcpus == 0 {
            return Err(invalid("vcpus must be positive"));
        }
        if self.memory_gb == 0 {
            return Err(invalid("memory_gb must be positive"));
        }
        if self.root_disk_gb == 0 {
            return Err(invalid("root_disk_gb must be positive"));
        }
        if self.memory_gb.checked_mul(MB_PER_GB).is_none() {
            return Err(invalid("memory_gb is too large"));
        }
        Ok(())
    }

    /// Memory in the control plane's unit.
    pub fn memory_mb(&self) -> u64 {
        self.memory_gb.saturating_mul(MB_PER_GB)
    }

    /// Build the wire request for this spec.
    pub fn to_create_request(&self) -> CreateVmRequest {
        CreateVmRequest {
            name: self.name.clone(),
            vcpus: self.vcpus,
            memory_mb: self.memory_mb(),
            base_image: self.base_image.clone(),
            root_disk_gb: self.root_disk_gb,
            ssh_user: self.ssh_user.clone(),
            ssh_public_key: self.ssh_public_key.clone(),
        }
    }
}

/// Remote truth about a VM as last read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Identifier assigned by the control plane.
    pub id: String,

    /// Lifecycle status, opaque to the engine.
    pub state: String,

    /// Guest address, absent until guest networking reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl ObservedState {
    /// True once the VM has a usable address.
    pub fn is_ready(&self) -> bool {
        self.ip_address.is_some()
    }
}

impl From<VmInfo> for ObservedState {
    fn from(info: VmInfo) -> Self {
        Self {
            id: info.id,
            state: info.state,
            ip_address: info.ip_address.filter(|ip| !ip.is_empty()),
        }
    }
}
