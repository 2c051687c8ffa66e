//! CLI command implementations

pub mod resume;
pub mod run;
pub mod state;

use std::path::Path;

use homelake_core::config::Settings;
use homelake_core::pipeline::PipelineKind;

use crate::error::CliError;

fn parse_kind(pipeline: &str) -> Result<PipelineKind, CliError> {
    pipeline.parse().map_err(CliError::InvalidArgument)
}

fn load_settings(config_dir: &Path) -> Result<Settings, CliError> {
    Ok(Settings::load(config_dir)?)
}
