//! `homelake run`

use std::path::Path;

use homelake_core::pipeline::{RunOutcome, run_pipeline};

use super::{load_settings, parse_kind};
use crate::error::CliError;
use crate::output;

pub async fn execute(
    config_dir: &Path,
    pipeline: &str,
    dry_run: bool,
    json: bool,
) -> Result<(), CliError> {
    let kind = parse_kind(pipeline)?;
    let settings = load_settings(config_dir)?;

    match run_pipeline(kind, &settings, dry_run).await? {
        RunOutcome::Completed(report) => output::report(&report, json)?,
        RunOutcome::AwaitingCode { challenge } => {
            eprintln!("Two-factor authentication required.");
            eprintln!("Enter the code sent to your trusted device with:");
            eprintln!("  homelake resume {kind} <CODE>");
            eprintln!("Pending sign-in saved to {}", challenge.display());
        }
    }
    Ok(())
}
