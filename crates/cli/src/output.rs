//! Output formatting for CLI

use anyhow::Context;
use homelake_core::destination::LoadRecord;
use homelake_core::pipeline::LoadReport;
use homelake_core::state::SourceState;

/// Print a run report; JSON goes to stdout, the summary to stderr
pub fn report(report: &LoadReport, json: bool) -> anyhow::Result<()> {
    report.print_summary();
    if json {
        let text = serde_json::to_string_pretty(report).context("Serializing load report")?;
        println!("{text}");
    }
    Ok(())
}

/// Print cursor state as JSON
pub fn state(state: &SourceState) -> anyhow::Result<()> {
    if state.is_empty() {
        eprintln!("No cursor state stored");
        return Ok(());
    }
    let text = serde_json::to_string_pretty(state).context("Serializing cursor state")?;
    println!("{text}");
    Ok(())
}

/// Print load history as a table
pub fn loads(loads: &[LoadRecord]) {
    if loads.is_empty() {
        eprintln!("No loads recorded");
        return;
    }
    println!(
        "{:<36}  {:<9}  {:<25}  {:>8}  MESSAGE",
        "LOAD ID", "STATUS", "STARTED", "RECORDS"
    );
    for load in loads {
        println!(
            "{:<36}  {:<9}  {:<25}  {:>8}  {}",
            load.load_id,
            load.status.to_string(),
            load.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            load.records,
            load.message.as_deref().map(first_line).unwrap_or_default()
        );
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}
