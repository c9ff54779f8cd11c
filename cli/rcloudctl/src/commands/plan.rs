//! Plan command. Local only.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use rcloud_reconcile::{ChangeClass, Classification};

use crate::manifest::VmManifest;
use crate::output::{print_info, print_output, OutputFormat};
use crate::state::VmRecord;

use super::CommandContext;

/// Show what apply would change.
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Manifest file path (TOML).
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub manifest: PathBuf,

    /// State file path (JSON).
    #[arg(long, value_name = "PATH", default_value = "vm.state.json")]
    pub state: PathBuf,
}

#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    #[tabled(rename = "Attribute")]
    attribute: String,

    #[tabled(rename = "Action")]
    action: String,
}

fn plan_rows(classification: &Classification) -> Vec<PlanRow> {
    classification
        .changes
        .iter()
        .map(|change| PlanRow {
            attribute: change.attribute.to_string(),
            action: change.class.to_string(),
        })
        .collect()
}

impl PlanCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let manifest = VmManifest::load(&self.manifest)?;
        let resource = ctx.resource()?;
        let desired = resource.resolve(&manifest)?;

        let Some(record) = VmRecord::load_optional(&self.state)? else {
            match ctx.format {
                OutputFormat::Table => {
                    print_info(&format!("VM {} will be created", desired.spec.name))
                }
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "name": desired.spec.name, "verdict": "create" })
                ),
            }
            return Ok(());
        };

        let classification = resource.plan(&record, &desired);
        let rows = plan_rows(&classification);

        match ctx.format {
            OutputFormat::Table => {
                if classification.verdict == ChangeClass::NoChange {
                    print_info(&format!("VM {} is up to date", record.id));
                } else {
                    print_output(&rows, ctx.format);
                    print_info(&format!("VM {}: {}", record.id, classification.verdict));
                }
            }
            OutputFormat::Json => {
                let out = serde_json::json!({
                    "id": record.id,
                    "verdict": classification.verdict.to_string(),
                    "changes": rows,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        Ok(())
    }
}
