//! Direct VM commands.
//!
//! These bypass state files and talk to the control plane as is.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rcloud_reconcile::{ControlPlane, VmReconciler};

use crate::output::{print_output, print_single, print_success, OutputFormat, VmRow};

use super::CommandContext;

/// VM commands.
#[derive(Debug, Args)]
pub struct VmCommand {
    #[command(subcommand)]
    command: VmSubcommand,
}

#[derive(Debug, Subcommand)]
enum VmSubcommand {
    /// List all VMs.
    List,

    /// Get VM details.
    Get(VmIdArgs),

    /// Start a stopped VM.
    Start(VmIdArgs),

    /// Stop a running VM.
    Stop(VmIdArgs),

    /// Delete a VM.
    Delete(VmIdArgs),
}

#[derive(Debug, Args)]
struct VmIdArgs {
    /// VM ID.
    id: String,
}

/// A state-changing VM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Delete,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Delete => "deleted",
        }
    }
}

impl VmCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            VmSubcommand::List => list_vms(ctx).await,
            VmSubcommand::Get(args) => get_vm(ctx, args).await,
            VmSubcommand::Start(args) => run_action(ctx, args, Action::Start).await,
            VmSubcommand::Stop(args) => run_action(ctx, args, Action::Stop).await,
            VmSubcommand::Delete(args) => run_action(ctx, args, Action::Delete).await,
        }
    }
}

async fn list_vms(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let list = client.list_vms().await.context("Failed to list VMs")?;

    let rows: Vec<VmRow> = list.vms.into_iter().map(VmRow::from).collect();
    print_output(&rows, ctx.format);
    Ok(())
}

async fn get_vm(ctx: CommandContext, args: VmIdArgs) -> Result<()> {
    let resource = ctx.resource()?;
    let info = resource
        .reconciler()
        .get(&args.id)
        .await
        .with_context(|| format!("Failed to get VM '{}'", args.id))?;

    print_single(&VmRow::from(info), ctx.format);
    Ok(())
}

async fn run_action(ctx: CommandContext, args: VmIdArgs, action: Action) -> Result<()> {
    let resource = ctx.resource()?;
    apply_action(resource.reconciler(), &args.id, action).await?;

    report(ctx.format, &args.id, action.past_tense());
    Ok(())
}

async fn apply_action<C: ControlPlane>(
    reconciler: &VmReconciler<C>,
    id: &str,
    action: Action,
) -> Result<()> {
    let result = match action {
        Action::Start => reconciler.start(id).await,
        Action::Stop => reconciler.stop(id).await,
        Action::Delete => reconciler.deprovision(id).await,
    };
    result.with_context(|| format!("Failed to {} VM '{}'", action.verb(), id))
}

fn report(format: OutputFormat, id: &str, status: &str) {
    match format {
        OutputFormat::Table => print_success(&format!("VM {} {}", id, status)),
        OutputFormat::Json => println!("{}", serde_json::json!({ "id": id, "status": status })),
    }
}
