//! Lifecycle reconcilers for a single VM resource.
//!
//! Each call reconciles one resource end to end. Callers serialize
//! operations on the same VM id.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ControlPlane, ControlPlaneError, VmInfo};
use crate::classify::{ChangeClass, Classification, MutabilityPolicy};
use crate::error::ReconcileError;
use crate::model::{ObservedState, ResourceSpec};
use crate::provision::{self, ProvisionPolicy, Provisioned};

/// Reconciler bound to a control plane.
#[derive(Debug, Clone)]
pub struct VmReconciler<C> {
    client: C,
    mutability: MutabilityPolicy,
    provision: ProvisionPolicy,
}

impl<C: ControlPlane> VmReconciler<C> {
    /// Create a reconciler with the default policies.
    pub fn new(client: C) -> Self {
        Self {
            client,
            mutability: MutabilityPolicy::default(),
            provision: ProvisionPolicy::default(),
        }
    }

    pub fn with_provision_policy(mut self, policy: ProvisionPolicy) -> Self {
        self.provision = policy;
        self
    }

    pub fn with_mutability_policy(mut self, policy: MutabilityPolicy) -> Self {
        self.mutability = policy;
        self
    }

    /// The underlying control plane.
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn provision_policy(&self) -> &ProvisionPolicy {
        &self.provision
    }

    /// Classify a proposed spec against the previous one. Pure.
    pub fn classify(&self, previous: &ResourceSpec, proposed: &ResourceSpec) -> Classification {
        self.mutability.classify(previous, proposed)
    }

    /// Create a VM and wait for it to become reachable.
    pub async fn provision(
        &self,
        spec: &ResourceSpec,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<Provisioned, ReconcileError> {
        provision::provision(&self.client, spec, &self.provision, shutdown).await
    }

    /// Read the current state of a VM.
    ///
    /// The returned address is absent whenever the control plane reports
    /// none, so a stale address is never carried forward.
    pub async fn refresh(&self, id: &str) -> Result<ObservedState, ReconcileError> {
        let info = self.get(id).await?;
        let observed = ObservedState::from(info);
        debug!(id = %id, state = %observed.state, ip = ?observed.ip_address, "Refreshed VM");
        Ok(observed)
    }

    /// Delete a VM. Single attempt.
    pub async fn deprovision(&self, id: &str) -> Result<(), ReconcileError> {
        info!(id = %id, "Deleting VM");
        self.client
            .delete_vm(id)
            .await
            .map_err(|e| remote_error(id, e))?;
        debug!(id = %id, "Deleted VM");
        Ok(())
    }

    /// Validate an update. Never mutates the remote VM.
    ///
    /// Returns the classification when the change can be accepted as is,
    /// and [`ReconcileError::ReplacementRequired`] when the orchestrator
    /// should have replaced the VM instead.
    pub fn update(
        &self,
        previous: &ResourceSpec,
        proposed: &ResourceSpec,
    ) -> Result<Classification, ReconcileError> {
        let classification = self.classify(previous, proposed);
        match classification.verdict {
            ChangeClass::NoChange => Ok(classification),
            ChangeClass::InPlaceUpdatable => {
                // The control plane has no resize call yet; accept the new
                // values into state only.
                warn!(
                    name = %proposed.name,
                    changes = classification.changes.len(),
                    "In-place change accepted without remote update"
                );
                Ok(classification)
            }
            ChangeClass::RequiresReplacement => Err(ReconcileError::ReplacementRequired {
                attributes: classification.replacing(),
            }),
        }
    }

    /// Look up an existing VM for import.
    pub async fn import(&self, id: &str) -> Result<VmInfo, ReconcileError> {
        let info = self.get(id).await?;
        info!(id = %id, name = %info.name, "Imported VM");
        Ok(info)
    }

    pub async fn start(&self, id: &str) -> Result<(), ReconcileError> {
        info!(id = %id, "Starting VM");
        self.client
            .start_vm(id)
            .await
            .map_err(|e| remote_error(id, e))
    }

    pub async fn stop(&self, id: &str) -> Result<(), ReconcileError> {
        info!(id = %id, "Stopping VM");
        self.client
            .stop_vm(id)
            .await
            .map_err(|e| remote_error(id, e))
    }

    /// Fetch full VM details.
    pub async fn get(&self, id: &str) -> Result<VmInfo, ReconcileError> {
        self.client.get_vm(id).await.map_err(|e| remote_error(id, e))
    }
}

fn remote_error(id: &str, err: ControlPlaneError) -> ReconcileError {
    if err.is_not_found() {
        ReconcileError::NotFound { id: id.to_string() }
    } else {
        ReconcileError::Remote(err)
    }
}
