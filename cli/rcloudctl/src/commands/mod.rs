//! CLI commands.

mod apply;
mod destroy;
mod import;
mod plan;
mod refresh;
mod vm;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::warn;

use rcloud_client::HttpControlPlane;
use rcloud_reconcile::VmReconciler;

use crate::config::{FileConfig, Overrides, ProviderConfig};
use crate::output::OutputFormat;
use crate::resource::{ProviderDefaults, VmResource};

/// rcloudctl - Declarative VM lifecycle for the rcloud control plane.
#[derive(Debug, Parser)]
#[command(name = "rcloudctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Control plane URL. Overrides the config file and RCLOUD_ENDPOINT.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token. Overrides the config file and RCLOUD_TOKEN.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Config file (JSON). Defaults to config.json in the user config directory.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Default SSH user for VMs that don't set one.
    #[arg(long, global = true)]
    ssh_user: Option<String>,

    /// Default SSH public key file for VMs that don't set one.
    #[arg(long, global = true, value_name = "PATH")]
    ssh_public_key_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or converge a VM from a manifest.
    Apply(apply::ApplyCommand),

    /// Show what apply would change, without calling the control plane.
    Plan(plan::PlanCommand),

    /// Update the state file from the control plane.
    Refresh(refresh::RefreshCommand),

    /// Delete the VM tracked by a state file.
    Destroy(destroy::DestroyCommand),

    /// Adopt an existing VM into a state file.
    Import(import::ImportCommand),

    /// Direct VM operations.
    Vm(vm::VmCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        if let Commands::Version = self.command {
            println!("rcloudctl {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let file = FileConfig::load(self.config.as_deref())?;
        let overrides = Overrides {
            endpoint: self.endpoint,
            token: self.token,
            ssh_user: self.ssh_user,
            ssh_public_key_file: self.ssh_public_key_file,
        };

        let ctx = CommandContext {
            config: ProviderConfig::from_sources(overrides, file),
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Apply(cmd) => cmd.run(ctx).await,
            Commands::Plan(cmd) => cmd.run(ctx).await,
            Commands::Refresh(cmd) => cmd.run(ctx).await,
            Commands::Destroy(cmd) => cmd.run(ctx).await,
            Commands::Import(cmd) => cmd.run(ctx).await,
            Commands::Vm(cmd) => cmd.run(ctx).await,
            Commands::Version => Ok(()),
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: ProviderConfig,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Get a control plane client.
    pub fn client(&self) -> Result<HttpControlPlane> {
        HttpControlPlane::new(&self.config.client_config())
            .with_context(|| format!("Failed to create client for {}", self.config.endpoint))
    }

    /// Get the VM resource bound to the configured control plane.
    pub fn resource(&self) -> Result<VmResource<HttpControlPlane>> {
        let reconciler = VmReconciler::new(self.client()?);
        Ok(VmResource::new(
            reconciler,
            ProviderDefaults::from(&self.config),
        ))
    }
}

/// Shutdown signal fired on Ctrl-C.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
        // Keep the sender alive so receivers don't see a closed channel.
        shutdown_tx.closed().await;
    });

    shutdown_rx
}
