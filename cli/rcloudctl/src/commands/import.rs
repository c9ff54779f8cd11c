//! Import command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::error::CliError;
use crate::output::{print_info, print_single, OutputFormat, VmRow};

use super::CommandContext;

/// Adopt an existing VM into a state file.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// VM ID assigned by the control plane.
    pub id: String,

    /// State file path (JSON).
    #[arg(long, value_name = "PATH", default_value = "vm.state.json")]
    pub state: PathBuf,
}

impl ImportCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if self.state.exists() {
            return Err(CliError::StateExists { path: self.state }.into());
        }

        let resource = ctx.resource()?;
        let record = resource.import(&self.id).await?;
        record.save(&self.state)?;

        print_single(&VmRow::from(&record), ctx.format);
        if ctx.format == OutputFormat::Table {
            print_info("base_image and root_disk_gb are taken from the manifest on the next apply");
        }
        Ok(())
    }
}
