//! `homelake state` and `homelake loads`

use std::path::Path;

use homelake_core::destination::Destination;
use homelake_core::pipeline::{PipelineConfig, open_destination};

use super::{load_settings, parse_kind};
use crate::error::CliError;
use crate::output;

fn config_for(config_dir: &Path, pipeline: &str) -> Result<Option<PipelineConfig>, CliError> {
    let kind = parse_kind(pipeline)?;
    let settings = load_settings(config_dir)?;
    let config = PipelineConfig::for_kind(kind, &settings);
    if !config.database.exists() {
        eprintln!(
            "No database for {kind} at {} (has it run yet?)",
            config.database.display()
        );
        return Ok(None);
    }
    Ok(Some(config))
}

/// Print the committed cursor state
pub fn show_state(config_dir: &Path, pipeline: &str) -> Result<(), CliError> {
    let Some(config) = config_for(config_dir, pipeline)? else {
        return Ok(());
    };
    let destination = open_destination(&config)?;
    let state = destination
        .state(&config.name)
        .map_err(homelake_core::pipeline::PipelineError::from)?;
    output::state(&state)?;
    Ok(())
}

/// Print recent loads, newest first
pub fn show_loads(config_dir: &Path, pipeline: &str, limit: usize) -> Result<(), CliError> {
    let Some(config) = config_for(config_dir, pipeline)? else {
        return Ok(());
    };
    let destination = open_destination(&config)?;
    let loads = destination
        .loads(&config.name, limit)
        .map_err(homelake_core::pipeline::PipelineError::from)?;
    output::loads(&loads);
    Ok(())
}
