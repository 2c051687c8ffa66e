//! Error types for destinations

use std::path::PathBuf;
use thiserror::Error;

use crate::state::StateError;

/// Errors raised while loading into a destination
#[derive(Error, Debug)]
pub enum DestinationError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Database file could not be opened
    #[error("Cannot open database {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// Table or column layout cannot hold the records
    #[error("Schema error in table '{table}': {message}")]
    Schema { table: String, message: String },

    /// Stored cursor state is invalid
    #[error(transparent)]
    State(#[from] StateError),
}

/// Result type for destination operations
pub type DestinationResult<T> = Result<T, DestinationError>;

impl DestinationError {
    /// Create a schema error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            DestinationError::Open { .. } => format!(
                "{self}\n\nHint: Check that the directory exists and no other process holds \
                 the database open."
            ),
            DestinationError::State(e) => e.user_message(),
            _ => format!("{self}\n\nThe load was rolled back; cursors were not advanced."),
        }
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for DestinationError {
    fn from(err: duckdb::Error) -> Self {
        DestinationError::Database(err.to_string())
    }
}
