//! rcloudctl - declarative VM lifecycle for the rcloud control plane.
//!
//! Manages VMs described by TOML manifests, tracking each one in a JSON
//! state file.

use anyhow::Result;
use clap::Parser;

mod commands;
mod config;
mod error;
mod logging;
mod manifest;
mod output;
mod resource;
mod state;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose(), cli.log_json());

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
