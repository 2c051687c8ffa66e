//! Error types for pipeline operations
//!
//! Errors chain to the module that raised them while providing
//! user-friendly messages for CLI output.

use thiserror::Error;

use crate::client::AuthError;
use crate::destination::DestinationError;
use crate::resource::DeclarationError;
use crate::sources::ExtractError;

/// Errors that can occur during a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid resource declaration
    #[error("Invalid resource: {0}")]
    Declaration(#[from] DeclarationError),

    /// Extraction failed
    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// Loading failed; nothing was committed
    #[error("Load failed: {0}")]
    Destination(#[from] DestinationError),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Feature not compiled in
    #[error("Feature '{0}' is not enabled in this build")]
    Unsupported(&'static str),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<crate::config::ConfigError> for PipelineError {
    fn from(err: crate::config::ConfigError) -> Self {
        PipelineError::Extract(ExtractError::Config(err))
    }
}

impl PipelineError {
    /// Check if a later run may succeed without changes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Extract(ExtractError::Client(_))
                | PipelineError::Extract(ExtractError::Drive(_))
        )
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ConfigError(msg) => {
                format!(
                    "Configuration error: {msg}\n\nHint: Check homelake.toml in the config directory."
                )
            }
            PipelineError::Extract(e) => e.user_message(),
            PipelineError::Destination(e) => e.user_message(),
            PipelineError::Auth(e) => e.user_message(),
            PipelineError::Unsupported(feature) => {
                format!("{self}\n\nHint: Rebuild with --features {feature}.")
            }
            _ => self.to_string(),
        }
    }
}
