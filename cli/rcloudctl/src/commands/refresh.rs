//! Refresh command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::output::{print_info, print_single, OutputFormat, VmRow};
use crate::state::VmRecord;

use super::CommandContext;

/// Update the state file from the control plane.
#[derive(Debug, Args)]
pub struct RefreshCommand {
    /// State file path (JSON).
    #[arg(long, value_name = "PATH", default_value = "vm.state.json")]
    pub state: PathBuf,

    /// Remove the state file if the VM no longer exists.
    #[arg(long)]
    pub drop_missing: bool,
}

impl RefreshCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let mut record = VmRecord::load(&self.state)?;
        let resource = ctx.resource()?;

        match resource.read(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() && self.drop_missing => {
                VmRecord::remove(&self.state)?;
                if ctx.format == OutputFormat::Table {
                    print_info(&format!(
                        "VM {} no longer exists, removed {}",
                        record.id,
                        self.state.display()
                    ));
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        record.save(&self.state)?;
        print_single(&VmRow::from(&record), ctx.format);
        Ok(())
    }
}
