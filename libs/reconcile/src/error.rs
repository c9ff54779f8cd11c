//! Reconciliation errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::api::ControlPlaneError;
use crate::classify::Attribute;

/// Outcome of the best-effort delete issued after a boot timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    /// The partially created VM was deleted.
    Deleted,

    /// The delete failed; the VM may still exist.
    Failed(String),
}

impl Cleanup {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Errors surfaced by the reconcilers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The spec was rejected before any remote call.
    #[error("invalid spec for VM {name}: {reason}")]
    InvalidSpec { name: String, reason: String },

    /// A local input (e.g. an SSH key file) could not be read. Nothing was
    /// sent to the control plane.
    #[error("unable to read {}: {source}", path.display())]
    LocalResourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The create request failed. Nothing was created.
    #[error("unable to create VM {name}: {source}")]
    CreateFailed {
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    /// Polling the new VM failed. No cleanup is attempted because the VM's
    /// state is unknown.
    #[error("unable to read VM {name} ({id}) after creation (attempt {attempts}): {source}")]
    ReadDuringProvisioningFailed {
        name: String,
        id: String,
        attempts: u32,
        #[source]
        source: ControlPlaneError,
    },

    /// The VM never reported an address within the poll budget.
    #[error(
        "VM {name} was created and started but did not acquire an IP address within {} seconds. \
         This typically indicates a networking issue with the base image or the control plane's \
         network configuration (for example DHCP inside the guest). Check that the VM has \
         networking configured and that the host network is active.{}{}",
        max_wait.as_secs(),
        last_state_note(last_state),
        cleanup_note(cleanup, id)
    )]
    ProvisioningTimeout {
        name: String,
        id: String,
        max_wait: Duration,
        last_state: Option<String>,
        cleanup: Cleanup,
    },

    /// The caller asked to stop while waiting for the VM.
    #[error("provisioning of VM {name} ({id}) cancelled after {attempts} attempts")]
    Cancelled {
        name: String,
        id: String,
        attempts: u32,
    },

    /// The VM no longer exists on the control plane.
    #[error("VM {id} no longer exists")]
    NotFound { id: String },

    /// Any other control plane failure.
    #[error(transparent)]
    Remote(#[from] ControlPlaneError),

    /// The proposed spec changes attributes that cannot be updated in place.
    #[error("changing {} requires replacing the VM", attribute_list(attributes))]
    ReplacementRequired { attributes: Vec<Attribute> },
}

impl ReconcileError {
    /// Returns true if the VM is gone from the control plane.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if a compensating delete was attempted and failed.
    pub fn cleanup_failed(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningTimeout { cleanup, .. } if cleanup.is_failed()
        )
    }

    /// Id of a VM that may have been left behind on the control plane.
    pub fn leaked_id(&self) -> Option<&str> {
        match self {
            Self::ProvisioningTimeout {
                id,
                cleanup: Cleanup::Failed(_),
                ..
            }
            | Self::ReadDuringProvisioningFailed { id, .. }
            | Self::Cancelled { id, .. } => Some(id),
            _ => None,
        }
    }
}

fn last_state_note(last_state: &Option<String>) -> String {
    match last_state {
        Some(state) => format!(" Last reported state: {state}."),
        None => String::new(),
    }
}

fn cleanup_note(cleanup: &Cleanup, id: &str) -> String {
    match cleanup {
        Cleanup::Deleted => String::new(),
        Cleanup::Failed(reason) => format!(
            " Cleanup failed: VM {id} could not be deleted ({reason}); manual removal may be required."
        ),
    }
}

fn attribute_list(attributes: &[Attribute]) -> String {
    attributes
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout(cleanup: Cleanup) -> ReconcileError {
        ReconcileError::ProvisioningTimeout {
            name: "vm-1".to_string(),
            id: "abc".to_string(),
            max_wait: Duration::from_secs(300),
            last_state: Some("running".to_string()),
            cleanup,
        }
    }

    #[test]
    fn test_timeout_message_names_vm_and_wait() {
        let msg = timeout(Cleanup::Deleted).to_string();
        assert!(msg.contains("vm-1"));
        assert!(msg.contains("300 seconds"));
        assert!(msg.contains("DHCP"));
        assert!(!msg.contains("Cleanup failed"));
        assert!(msg.contains("Last reported state: running."));
    }

    #[test]
    fn test_timeout_without_observation_omits_state() {
        let err = ReconcileError::ProvisioningTimeout {
            name: "vm-1".to_string(),
            id: "abc".to_string(),
            max_wait: Duration::from_secs(300),
            last_state: None,
            cleanup: Cleanup::Deleted,
        };
        assert!(!err.to_string().contains("Last reported state"));
    }

    #[test]
    fn test_timeout_with_failed_cleanup() {
        let err = timeout(Cleanup::Failed("API returned status 500: busy".to_string()));
        assert!(err.cleanup_failed());
        assert_eq!(err.leaked_id(), Some("abc"));
        assert!(err.to_string().contains("Cleanup failed"));

        assert!(!timeout(Cleanup::Deleted).cleanup_failed());
        assert_eq!(timeout(Cleanup::Deleted).leaked_id(), None);
    }

    #[test]
    fn test_replacement_required_lists_attributes() {
        let err = ReconcileError::ReplacementRequired {
            attributes: vec![Attribute::Vcpus, Attribute::MemoryGb],
        };
        assert_eq!(
            err.to_string(),
            "changing vcpus, memory_gb requires replacing the VM"
        );
    }
}
