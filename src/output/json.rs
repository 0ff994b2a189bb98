use crate::model::DiscoveryReport;
use anyhow::Result;

pub fn print_json(report: &DiscoveryReport) -> Result<()> {
    println!("{}", generate_json_string(report)?);
    Ok(())
}

pub(super) fn generate_json_string(report: &DiscoveryReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
