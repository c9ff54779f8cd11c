//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use rcloud_reconcile::VmInfo;

use crate::state::VmRecord;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => Self::Json,
            _ => Self::Table,
        }
    }
}

/// Print data in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => println!("{}", format_json(data, "[]")),
    }
}

/// Print a single item in the specified format.
pub fn print_single<T: Serialize + Tabled>(data: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => println!("{}", Table::new([data]).to_string()),
        OutputFormat::Json => println!("{}", format_json(data, "{}")),
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| fallback.to_string())
}

/// One VM as shown in tables.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct VmRow {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Name")]
    pub name: String,

    #[tabled(rename = "State")]
    pub state: String,

    #[tabled(rename = "vCPUs")]
    pub vcpus: u32,

    #[tabled(rename = "Memory (MB)")]
    pub memory_mb: u64,

    #[tabled(rename = "IP", display = "display_option")]
    pub ip_address: Option<String>,
}

impl From<VmInfo> for VmRow {
    fn from(info: VmInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            state: info.state,
            vcpus: info.vcpus,
            memory_mb: info.memory_mb,
            ip_address: info.ip_address,
        }
    }
}

impl From<&VmRecord> for VmRow {
    fn from(record: &VmRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            state: record.state.clone(),
            vcpus: record.vcpus,
            memory_mb: record.memory_gb.saturating_mul(rcloud_reconcile::model::MB_PER_GB),
            ip_address: record.ip_address.clone(),
        }
    }
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}
