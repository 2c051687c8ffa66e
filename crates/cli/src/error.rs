//! CLI error type

use homelake_core::config::ConfigError;
use homelake_core::pipeline::PipelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Output error: {0}")]
    Output(String),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Output(format!("{err:#}"))
    }
}

impl CliError {
    /// Message shown to the user, with hints where available
    pub fn user_message(&self) -> String {
        match self {
            CliError::Config(e) => e.user_message(),
            CliError::Pipeline(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}
