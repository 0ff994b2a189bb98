mod cli;
mod json;

pub use cli::print_cli_table;
pub use json::print_json;

use crate::model::DiscoveryReport;
use anyhow::Result;

/// Output format for discovery results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'table' or 'json'", s)),
        }
    }
}

pub fn print_result(report: &DiscoveryReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_cli_table(report),
        OutputFormat::Json => print_json(report),
    }
}

/// Format result to string for file output
pub fn format_result_to_string(report: &DiscoveryReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => json::generate_json_string(report),
        OutputFormat::Table => {
            // For table format, just use JSON as the file output
            json::generate_json_string(report)
        }
    }
}
