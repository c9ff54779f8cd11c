//! VM resource lifecycle.
//!
//! Glue between a manifest, the persisted record and the reconciler:
//! provider defaults are applied and the SSH key file is read here, so the
//! engine only ever sees a fully resolved [`ResourceSpec`].

use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{debug, info};

use rcloud_reconcile::model::MB_PER_GB;
use rcloud_reconcile::{Classification, ControlPlane, ReconcileError, ResourceSpec, VmReconciler};

use crate::config::{expand_home, resolve_default, ProviderConfig};
use crate::manifest::VmManifest;
use crate::state::VmRecord;

/// Provider-level fallbacks for optional manifest fields.
#[derive(Debug, Clone, Default)]
pub struct ProviderDefaults {
    pub ssh_user: Option<String>,
    pub ssh_public_key_file: Option<PathBuf>,
}

impl From<&ProviderConfig> for ProviderDefaults {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            ssh_user: config.ssh_user.clone(),
            ssh_public_key_file: config.ssh_public_key_file.clone(),
        }
    }
}

/// A manifest with defaults applied and key material loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Desired {
    pub spec: ResourceSpec,

    /// Key file as written, before `~` expansion.
    pub ssh_public_key_file: Option<PathBuf>,
}

/// Lifecycle operations for one VM resource.
pub struct VmResource<C> {
    reconciler: VmReconciler<C>,
    defaults: ProviderDefaults,
}

impl<C: ControlPlane> VmResource<C> {
    pub fn new(reconciler: VmReconciler<C>, defaults: ProviderDefaults) -> Self {
        Self {
            reconciler,
            defaults,
        }
    }

    pub fn reconciler(&self) -> &VmReconciler<C> {
        &self.reconciler
    }

    /// Apply defaults and read the SSH key. No remote call is made.
    pub fn resolve(&self, manifest: &VmManifest) -> Result<Desired, ReconcileError> {
        let ssh_user = resolve_default(manifest.ssh_user.clone(), self.defaults.ssh_user.as_ref());
        let key_file = resolve_default(
            manifest.ssh_public_key_file.clone(),
            self.defaults.ssh_public_key_file.as_ref(),
        );

        let ssh_public_key = match &key_file {
            Some(path) => {
                let path = expand_home(path);
                let key = std::fs::read_to_string(&path)
                    .map_err(|source| ReconcileError::LocalResourceRead { path, source })?;
                Some(key)
            }
            None => None,
        };

        Ok(Desired {
            spec: ResourceSpec {
                name: manifest.name.clone(),
                vcpus: manifest.vcpus,
                memory_gb: manifest.memory_gb,
                base_image: manifest.base_image.clone(),
                root_disk_gb: manifest.root_disk_gb,
                ssh_user,
                ssh_public_key,
            },
            ssh_public_key_file: key_file,
        })
    }

    /// Provision a new VM and build its record.
    pub async fn create(
        &self,
        desired: &Desired,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<VmRecord, ReconcileError> {
        let provisioned = self.reconciler.provision(&desired.spec, shutdown).await?;
        Ok(VmRecord::from_spec(
            &desired.spec,
            desired.ssh_public_key_file.clone(),
            &provisioned.observed,
        ))
    }

    /// Refresh the record from the control plane.
    pub async fn read(&self, record: &mut VmRecord) -> Result<(), ReconcileError> {
        let observed = self.reconciler.refresh(&record.id).await?;
        record.observe(&observed);
        Ok(())
    }

    /// Classify the desired spec against the record. Pure.
    pub fn plan(&self, record: &VmRecord, desired: &Desired) -> Classification {
        let prior = record.prior_spec(&desired.spec);
        self.reconciler.classify(&prior, &desired.spec)
    }

    /// Accept the desired spec into the record if no replacement is needed.
    pub fn update(
        &self,
        record: &mut VmRecord,
        desired: &Desired,
    ) -> Result<Classification, ReconcileError> {
        let prior = record.prior_spec(&desired.spec);
        let classification = self.reconciler.update(&prior, &desired.spec)?;
        record.accept(&desired.spec, desired.ssh_public_key_file.clone());
        debug!(id = %record.id, verdict = %classification.verdict, "Record updated");
        Ok(classification)
    }

    pub async fn delete(&self, record: &VmRecord) -> Result<(), ReconcileError> {
        self.reconciler.deprovision(&record.id).await
    }

    /// Adopt an existing VM.
    pub async fn import(&self, id: &str) -> Result<VmRecord, ReconcileError> {
        let info = self.reconciler.import(id).await?;
        info!(id = %info.id, memory_mb = info.memory_mb, "Adopting VM");

        Ok(VmRecord {
            id: info.id,
            name: info.name,
            vcpus: info.vcpus,
            memory_gb: info.memory_mb / MB_PER_GB,
            base_image: None,
            root_disk_gb: None,
            ssh_user: None,
            ssh_public_key_file: None,
            ssh_public_key: None,
            state: info.state,
            ip_address: info.ip_address.filter(|ip| !ip.is_empty()),
            created_at: chrono::Utc::now(),
            adopted: true,
        })
    }
}
