//! `homelake resume`

use std::path::Path;

use homelake_core::pipeline::{PipelineKind, resume_journal};

use super::{load_settings, parse_kind};
use crate::error::CliError;
use crate::output;

pub async fn execute(
    config_dir: &Path,
    pipeline: &str,
    code: &str,
    dry_run: bool,
    json: bool,
) -> Result<(), CliError> {
    let kind = parse_kind(pipeline)?;
    if kind != PipelineKind::Journal {
        return Err(CliError::InvalidArgument(format!(
            "{kind} does not use two-factor authentication"
        )));
    }
    let settings = load_settings(config_dir)?;

    let report = resume_journal(&settings, code, dry_run).await?;
    output::report(&report, json)?;
    Ok(())
}
