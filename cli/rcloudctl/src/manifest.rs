//! VM manifest parsing.
//!
//! A manifest is a flat TOML table describing one VM:
//!
//! ```toml
//! name = "kdevops-1"
//! vcpus = 4
//! memory_gb = 8
//! base_image = "debian-13-generic-amd64.qcow2"
//! root_disk_gb = 50
//! ssh_user = "kdevops"                         # optional
//! ssh_public_key_file = "~/.ssh/id_ed25519.pub" # optional
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Desired VM attributes as written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmManifest {
    pub name: String,
    pub vcpus: u32,
    pub memory_gb: u64,
    pub base_image: String,
    pub root_disk_gb: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key_file: Option<PathBuf>,
}

impl VmManifest {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid VM manifest TOML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("failed to load manifest: {}", path.display()))
    }
}
