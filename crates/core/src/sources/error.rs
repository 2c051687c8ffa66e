//! Error types for extraction

use thiserror::Error;

use crate::client::{AuthError, ClientError, DriveError};
use crate::config::ConfigError;

/// Errors that abort an extraction
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Export folder has no parseable exports
    #[error("No exports found in {path}")]
    EmptyExportListing { path: String },

    /// Start date could not be parsed
    #[error("Invalid start date '{0}': expected YYYY-MM-DD or an RFC 3339 timestamp")]
    InvalidStartDate(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExtractError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ExtractError::EmptyExportListing { path } => format!(
                "No exports found in {path}\n\nHint: Check journal.root, and that Arc Editor has \
                 written at least one export folder."
            ),
            ExtractError::Auth(e) => e.user_message(),
            ExtractError::Client(e) => e.user_message(),
            ExtractError::Config(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}
