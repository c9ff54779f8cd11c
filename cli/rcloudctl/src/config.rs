//! Provider configuration.
//!
//! Values are resolved per field, highest precedence first:
//! - command-line flag
//! - config file (`--config`, or `config.json` in the user config directory)
//! - environment (`RCLOUD_ENDPOINT`, `RCLOUD_TOKEN`)
//! - built-in default

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use rcloud_client::{ClientConfig, DEFAULT_TIMEOUT};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8765";

pub const ENV_ENDPOINT: &str = "RCLOUD_ENDPOINT";
pub const ENV_TOKEN: &str = "RCLOUD_TOKEN";

/// Get the default config file path.
fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "rcloud", "rcloudctl")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Contents of the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Default SSH user for VMs that don't set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,

    /// Default SSH public key file for VMs that don't set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key_file: Option<PathBuf>,

    /// Per-request timeout. Zero means the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load the config file.
    ///
    /// An explicit path must exist. A missing default file yields an empty
    /// config.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_public_key_file: Option<PathBuf>,
}

/// Fully resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_public_key_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ssh_user", &self.ssh_user)
            .field("ssh_public_key_file", &self.ssh_public_key_file)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve from flags, file and the process environment.
    pub fn from_sources(overrides: Overrides, file: FileConfig) -> Self {
        Self::resolve(overrides, file, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve<E>(overrides: Overrides, file: FileConfig, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let endpoint = overrides
            .endpoint
            .or(file.endpoint)
            .or_else(|| env(ENV_ENDPOINT))
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let token = overrides
            .token
            .or(file.token)
            .or_else(|| env(ENV_TOKEN))
            .filter(|t| !t.is_empty());

        Self {
            endpoint,
            token,
            ssh_user: overrides.ssh_user.or(file.ssh_user),
            ssh_public_key_file: overrides.ssh_public_key_file.or(file.ssh_public_key_file),
            timeout: file
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    /// Connection settings for the HTTP client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint.clone())
            .with_token(self.token.clone())
            .with_timeout(self.timeout)
    }
}

/// Pick the resource value, else the provider default, else nothing.
///
/// An empty provider default counts as unset.
pub fn resolve_default<T>(resource: Option<T>, provider: Option<&T>) -> Option<T>
where
    T: Clone + AsRef<OsStr>,
{
    resource.or_else(|| {
        provider
            .filter(|p| !AsRef::<OsStr>::as_ref(*p).is_empty())
            .cloned()
    })
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
