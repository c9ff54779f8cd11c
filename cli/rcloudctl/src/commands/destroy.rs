//! Destroy command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::output::{print_success, OutputFormat};
use crate::state::VmRecord;

use super::CommandContext;

/// Delete the VM tracked by a state file.
#[derive(Debug, Args)]
pub struct DestroyCommand {
    /// State file path (JSON).
    #[arg(long, value_name = "PATH", default_value = "vm.state.json")]
    pub state: PathBuf,
}

impl DestroyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let record = VmRecord::load(&self.state)?;
        let resource = ctx.resource()?;

        resource.delete(&record).await?;
        VmRecord::remove(&self.state)?;

        match ctx.format {
            OutputFormat::Table => print_success(&format!("Deleted VM {}", record.id)),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "id": record.id, "status": "deleted" })
            ),
        }
        Ok(())
    }
}
