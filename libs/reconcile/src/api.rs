//! Control plane seam.
//!
//! The reconciler talks to the remote compute API only through the
//! [`ControlPlane`] trait. Wire types mirror the control plane's JSON bodies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a control plane implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    /// The control plane has no VM with this id.
    #[error("VM not found: {id}")]
    NotFound { id: String },

    /// The control plane answered with an unexpected status.
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response.
    #[error("failed to send request: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ControlPlaneError {
    /// Returns true if the control plane reported the VM as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status of the failure, if the control plane answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Request body for `POST /api/v1/vms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVmRequest {
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub base_image: String,
    pub root_disk_gb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
}

/// Response body for a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVmResponse {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// VM details as reported by `GET /api/v1/vms/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub state: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Response body for `GET /api/v1/vms`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmList {
    #[serde(default)]
    pub vms: Vec<VmInfo>,
}

/// Remote compute control plane.
///
/// Implementations hold no per-resource state and may be shared across
/// independent reconciliations.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit a VM creation request.
    async fn create_vm(&self, request: &CreateVmRequest)
        -> Result<CreateVmResponse, ControlPlaneError>;

    /// Fetch the current state of a VM.
    async fn get_vm(&self, id: &str) -> Result<VmInfo, ControlPlaneError>;

    /// Delete a VM.
    async fn delete_vm(&self, id: &str) -> Result<(), ControlPlaneError>;

    /// Start a stopped VM.
    async fn start_vm(&self, id: &str) -> Result<(), ControlPlaneError>;

    /// Stop a running VM.
    async fn stop_vm(&self, id: &str) -> Result<(), ControlPlaneError>;
}

#[async_trait]
impl<C: ControlPlane + ?Sized> ControlPlane for std::sync::Arc<C> {
    async fn create_vm(
        &self,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse, ControlPlaneError> {
        (**self).create_vm(request).await
    }

    async fn get_vm(&self, id: &str) -> Result<VmInfo, ControlPlaneError> {
        (**self).get_vm(id).await
    }

    async fn delete_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        (**self).delete_vm(id).await
    }

    async fn start_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        (**self).start_vm(id).await
    }

    async fn stop_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        (**self).stop_vm(id).await
    }
}
