//! Persisted resource record.
//!
//! One JSON file per managed VM. The record holds the last applied spec and
//! the last observed remote state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rcloud_reconcile::{ObservedState, ResourceSpec};

use crate::error::CliError;

/// State of one managed VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub vcpus: u32,
    pub memory_gb: u64,

    /// Unknown for imported VMs until the first apply.
    #[serde(default)]
    pub base_image: Option<String>,

    /// Unknown for imported VMs until the first apply.
    #[serde(default)]
    pub root_disk_gb: Option<u64>,

    #[serde(default)]
    pub ssh_user: Option<String>,

    #[serde(default)]
    pub ssh_public_key_file: Option<PathBuf>,

    /// Key material sent on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,

    pub state: String,

    #[serde(default)]
    pub ip_address: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Adopted with `import`; creation-time attributes come from the next
    /// manifest.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub adopted: bool,
}

impl VmRecord {
    /// Build a record for a spec that was just applied.
    pub fn from_spec(
        spec: &ResourceSpec,
        ssh_public_key_file: Option<PathBuf>,
        observed: &ObservedState,
    ) -> Self {
        Self {
            id: observed.id.clone(),
            name: spec.name.clone(),
            vcpus: spec.vcpus,
            memory_gb: spec.memory_gb,
            base_image: Some(spec.base_image.clone()),
            root_disk_gb: Some(spec.root_disk_gb),
            ssh_user: spec.ssh_user.clone(),
            ssh_public_key_file,
            ssh_public_key: spec.ssh_public_key.clone(),
            state: observed.state.clone(),
            ip_address: observed.ip_address.clone(),
            created_at: Utc::now(),
            adopted: false,
        }
    }

    /// Take the latest observation. The address is replaced even when absent.
    pub fn observe(&mut self, observed: &ObservedState) {
        self.state = observed.state.clone();
        self.ip_address = observed.ip_address.clone();
    }

    /// Accept a new spec into the record without touching the remote VM.
    pub fn accept(&mut self, spec: &ResourceSpec, ssh_public_key_file: Option<PathBuf>) {
        self.name = spec.name.clone();
        self.vcpus = spec.vcpus;
        self.memory_gb = spec.memory_gb;
        self.base_image = Some(spec.base_image.clone());
        self.root_disk_gb = Some(spec.root_disk_gb);
        self.ssh_user = spec.ssh_user.clone();
        self.ssh_public_key_file = ssh_public_key_file;
        self.ssh_public_key = spec.ssh_public_key.clone();
        self.adopted = false;
    }

    /// The spec this record was applied with.
    ///
    /// For an adopted record, attributes the control plane never reported
    /// are taken from `proposed` so they do not count as changes.
    pub fn prior_spec(&self, proposed: &ResourceSpec) -> ResourceSpec {
        if self.adopted {
            return ResourceSpec {
                name: self.name.clone(),
                vcpus: self.vcpus,
                memory_gb: self.memory_gb,
                base_image: self
                    .base_image
                    .clone()
                    .unwrap_or_else(|| proposed.base_image.clone()),
                root_disk_gb: self.root_disk_gb.unwrap_or(proposed.root_disk_gb),
                ssh_user: proposed.ssh_user.clone(),
                ssh_public_key: proposed.ssh_public_key.clone(),
            };
        }

        ResourceSpec {
            name: self.name.clone(),
            vcpus: self.vcpus,
            memory_gb: self.memory_gb,
            base_image: self.base_image.clone().unwrap_or_default(),
            root_disk_gb: self.root_disk_gb.unwrap_or_default(),
            ssh_user: self.ssh_user.clone(),
            ssh_public_key: self.ssh_public_key.clone(),
        }
    }

    /// Load a record. A missing file is [`CliError::NoState`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CliError::NoState {
                path: path.to_path_buf(),
            }
            .into());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state from {:?}", path))
    }

    /// Load a record if the file exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to write state to {:?}", path))?;
            file.write_all(contents.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, contents)
                .with_context(|| format!("Failed to write state to {:?}", path))?;
        }

        Ok(())
    }

    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove state file {:?}", path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ResourceSpec {
        ResourceSpec {
            name: "kdevops-1".to_string(),
            vcpus: 2,
            memory_gb: 4,
            base_image: "debian-13.qcow2".to_string(),
            root_disk_gb: 20,
            ssh_user: Some("kdevops".to_string()),
            ssh_public_key: Some("ssh-ed25519 AAAA test".to_string()),
        }
    }

    fn observed(ip: Option<&str>) -> ObservedState {
        ObservedState {
            id: "0b6c".to_string(),
            state: "running".to_string(),
            ip_address: ip.map(str::to_string),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vm.state.json");

        let record = VmRecord::from_spec(&spec(), None, &observed(Some("192.168.122.10")));
        record.save(&path).unwrap();

        let loaded = VmRecord::load(&path).unwrap();
        assert_eq!(loaded, record);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        VmRecord::remove(&path).unwrap();
        assert!(!path.exists());
        VmRecord::remove(&path).unwrap();
    }

    #[test]
    fn test_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.state.json");

        let err = VmRecord::load(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NoState { .. })
        ));
        assert!(VmRecord::load_optional(&path).unwrap().is_none());
    }

    #[test]
    fn test_observe_clears_ip() {
        let mut record = VmRecord::from_spec(&spec(), None, &observed(Some("192.168.122.10")));
        record.observe(&ObservedState {
            id: "0b6c".to_string(),
            state: "shutoff".to_string(),
            ip_address: None,
        });

        assert_eq!(record.state, "shutoff");
        assert_eq!(record.ip_address, None);
    }

    #[test]
    fn test_prior_spec_roundtrips_applied_spec() {
        let record = VmRecord::from_spec(&spec(), None, &observed(None));
        assert_eq!(record.prior_spec(&spec()), spec());
    }

    #[test]
    fn test_prior_spec_for_adopted_record() {
        let record = VmRecord {
            id: "0b6c".to_string(),
            name: "kdevops-1".to_string(),
            vcpus: 2,
            memory_gb: 4,
            base_image: None,
            root_disk_gb: None,
            ssh_user: None,
            ssh_public_key_file: None,
            ssh_public_key: None,
            state: "running".to_string(),
            ip_address: None,
            created_at: Utc::now(),
            adopted: true,
        };

        assert_eq!(record.prior_spec(&spec()), spec());

        let mut bigger = spec();
        bigger.vcpus = 8;
        assert_eq!(record.prior_spec(&bigger).vcpus, 2);
    }
}
