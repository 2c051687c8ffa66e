//! Error types for incremental state

use thiserror::Error;

/// Errors reading or writing persisted cursor state
#[derive(Error, Debug)]
pub enum StateError {
    /// Stored cursor could not be parsed
    #[error("Invalid stored cursor for resource '{resource}': {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    /// Cursor could not be serialized
    #[error("Failed to encode cursor for resource '{resource}': {source}")]
    Encode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

impl StateError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            StateError::Decode { resource, .. } => format!(
                "{self}\n\nHint: Inspect the cursor with `homelake state`, or delete the row for \
                 '{resource}' from _homelake.pipeline_state to start from the initial value."
            ),
            StateError::Encode { .. } => self.to_string(),
        }
    }
}
