//! Error handling and display for the CLI.

use std::path::PathBuf;

use colored::Colorize;
use thiserror::Error;

use rcloud_reconcile::{ControlPlaneError, ReconcileError};

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No state file at {}. Run `rcloudctl apply` or `rcloudctl import` first.", path.display())]
    NoState { path: PathBuf },

    #[error("State file {} already tracks a VM", path.display())]
    StateExists { path: PathBuf },
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(hint) = hint(err) {
        eprintln!("\n{}", format!("Hint: {}", hint).yellow());
    }
}

fn hint(err: &anyhow::Error) -> Option<String> {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::NoState { .. } => None,
            CliError::StateExists { .. } => {
                Some("Use a different --state path or `rcloudctl destroy` first.".to_string())
            }
        };
    }

    if let Some(remote) = err.downcast_ref::<ControlPlaneError>() {
        return control_plane_hint(remote);
    }

    let reconcile_err = err.downcast_ref::<ReconcileError>()?;

    if let Some(id) = reconcile_err.leaked_id() {
        return Some(format!(
            "VM {id} may still exist on the control plane. Remove it with `rcloudctl vm delete {id}`."
        ));
    }

    match reconcile_err {
        ReconcileError::ProvisioningTimeout { last_state, .. } => {
            let mut hint = "Check that the base image brings up networking (DHCP) and that the host network is active."
                .to_string();
            if let Some(state) = last_state {
                hint.push_str(&format!(" The VM was last reported as {state}."));
            }
            Some(hint)
        }
        ReconcileError::NotFound { .. } => Some(
            "The VM no longer exists. If a state file tracks it, run `rcloudctl refresh --drop-missing`."
                .to_string(),
        ),
        ReconcileError::ReplacementRequired { .. } => {
            Some("Re-run with `--replace` to delete and re-create the VM.".to_string())
        }
        ReconcileError::LocalResourceRead { .. } => {
            Some("Check ssh_public_key_file in the manifest or provider config.".to_string())
        }
        ReconcileError::CreateFailed { source, .. } => control_plane_hint(source),
        ReconcileError::Remote(remote) => control_plane_hint(remote),
        _ => None,
    }
}

fn control_plane_hint(err: &ControlPlaneError) -> Option<String> {
    match err {
        ControlPlaneError::Transport(_) => {
            Some("Check that the control plane is running and --endpoint is correct.".to_string())
        }
        ControlPlaneError::Status { status: 401, .. } => {
            Some("The control plane rejected the token. Check --token or RCLOUD_TOKEN.".to_string())
        }
        _ => None,
    }
}
