use crate::model::{DiscoveryReport, PythonEnvKind};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct EnvRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Executable")]
    executable: String,
}

pub fn print_cli_table(report: &DiscoveryReport) -> Result<()> {
    println!();
    println!(
        "Scan completed at: {}",
        report.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    if report.environments.is_empty() {
        println!("No Python environments found.");
        return Ok(());
    }

    println!("Found {} environments:", report.environments.len());
    println!();

    let rows: Vec<EnvRow> = report
        .environments
        .iter()
        .map(|env| EnvRow {
            kind: env.kind.display_name().to_string(),
            version: format_version(&env.version.to_string()),
            name: if env.name.is_empty() {
                "-".to_string()
            } else {
                truncate(&env.name, 30)
            },
            executable: env.executable.display().to_string(),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    println!();
    print_summary(report);

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

fn format_version(version: &str) -> String {
    if version == "unknown" {
        "-".to_string()
    } else {
        version.to_string()
    }
}

fn print_summary(report: &DiscoveryReport) {
    let unknown_count = report
        .environments
        .iter()
        .filter(|e| e.version.is_unknown())
        .count();

    println!("Summary:");
    if unknown_count > 0 {
        println!(
            "  Total environments: {} ({} with unknown version)",
            report.environments.len(),
            unknown_count
        );
    } else {
        println!("  Total environments: {}", report.environments.len());
    }

    let by_kind: Vec<String> = PythonEnvKind::ALL
        .iter()
        .map(|kind| (kind, report.count_by_kind(*kind)))
        .filter(|(_, count)| *count > 0)
        .map(|(kind, count)| format!("{} {}", count, kind.display_name()))
        .collect();
    if by_kind.len() > 1 {
        println!("  By kind: {}", by_kind.join(", "));
    }
}
