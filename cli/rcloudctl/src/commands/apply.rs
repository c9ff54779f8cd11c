//! Apply command.
//!
//! Converges the VM tracked by a state file towards a manifest. With no
//! state file the VM is created; otherwise it is refreshed and the change
//! classified. Changes that force replacement need `--replace`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use rcloud_reconcile::{ChangeClass, ControlPlane};

use crate::manifest::VmManifest;
use crate::output::{print_info, print_single, print_success, OutputFormat, VmRow};
use crate::resource::{Desired, VmResource};
use crate::state::VmRecord;

use super::{shutdown_signal, CommandContext};

/// Create or converge a VM from a manifest.
#[derive(Debug, Args)]
pub struct ApplyCommand {
    /// Manifest file path (TOML).
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub manifest: PathBuf,

    /// State file path (JSON).
    #[arg(long, value_name = "PATH", default_value = "vm.state.json")]
    pub state: PathBuf,

    /// Delete and re-create the VM when a change cannot be applied in place.
    #[arg(long)]
    pub replace: bool,
}

impl ApplyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let manifest = VmManifest::load(&self.manifest)?;
        let resource = ctx.resource()?;
        let desired = resource.resolve(&manifest)?;

        let apply = Apply {
            resource: &resource,
            desired: &desired,
            state: &self.state,
            format: ctx.format,
        };

        let record = match VmRecord::load_optional(&self.state)? {
            None => apply.create().await?,
            Some(record) => apply.converge(record, self.replace).await?,
        };

        print_single(&VmRow::from(&record), ctx.format);
        Ok(())
    }
}

struct Apply<'a, C> {
    resource: &'a VmResource<C>,
    desired: &'a Desired,
    state: &'a Path,
    format: OutputFormat,
}

impl<C: ControlPlane> Apply<'_, C> {
    async fn converge(&self, mut record: VmRecord, replace: bool) -> Result<VmRecord> {
        match self.resource.read(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                self.info(&format!("VM {} no longer exists, creating it again", record.id));
                VmRecord::remove(self.state)?;
                return self.create().await;
            }
            Err(e) => return Err(e).context("Failed to refresh VM before apply"),
        }

        let plan = self.resource.plan(&record, self.desired);
        match plan.verdict {
            ChangeClass::NoChange => {
                record.save(self.state)?;
                self.info("No changes");
            }
            ChangeClass::RequiresReplacement if replace => {
                let attributes: Vec<String> =
                    plan.replacing().iter().map(|a| a.to_string()).collect();
                info!(id = %record.id, attributes = ?attributes, "Replacing VM");
                self.info(&format!(
                    "Replacing VM {} ({} changed)",
                    record.id,
                    attributes.join(", ")
                ));

                self.resource.delete(&record).await?;
                VmRecord::remove(self.state)?;
                return self.create().await;
            }
            _ => {
                self.resource.update(&mut record, self.desired)?;
                record.save(self.state)?;
                self.success(&format!("Updated VM {}", record.id));
            }
        }

        Ok(record)
    }

    async fn create(&self) -> Result<VmRecord> {
        self.info(&format!(
            "Creating VM {}, waiting up to {} seconds for an IP address",
            self.desired.spec.name,
            self.resource
                .reconciler()
                .provision_policy()
                .max_wait()
                .as_secs()
        ));

        let record = self
            .resource
            .create(self.desired, Some(shutdown_signal()))
            .await?;
        record.save(self.state)?;

        self.success(&format!(
            "Created VM {} ({})",
            record.name,
            record.ip_address.as_deref().unwrap_or("-")
        ));
        Ok(record)
    }

    fn info(&self, message: &str) {
        if self.format == OutputFormat::Table {
            print_info(message);
        }
    }

    fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            print_success(message);
        }
    }
}
