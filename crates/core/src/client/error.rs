//! Error types for remote clients

use thiserror::Error;

/// Errors from REST requests
#[derive(Error, Debug)]
pub enum ClientError {
    /// Client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    /// Transport-level failure
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success status
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body was not the expected JSON
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl ClientError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { status: 401, .. } | ClientError::Status { status: 403, .. } => {
                format!("{self}\n\nHint: Check the access token in secrets.toml.")
            }
            ClientError::Request { .. } => {
                format!("{self}\n\nHint: Check your network connection and the configured base_url.")
            }
            _ => self.to_string(),
        }
    }
}

/// Errors from drive listing and downloads
#[derive(Error, Debug)]
pub enum DriveError {
    /// Entry does not exist
    #[error("Not found on drive: {0}")]
    NotFound(String),

    /// Local filesystem failure
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote drive failure
    #[error("Drive request failed: {0}")]
    Remote(#[from] ClientError),

    /// Remote drive answered with an unexpected payload
    #[error("Unexpected drive response: {0}")]
    Protocol(String),

    /// Session is not authenticated
    #[error("Drive session is not authenticated")]
    NotAuthenticated,
}

/// Errors establishing a drive session
#[derive(Error, Debug)]
pub enum AuthError {
    /// Credentials refused
    #[error("Sign-in failed for {account}: {message}")]
    SignInFailed { account: String, message: String },

    /// Second-factor code refused
    #[error("Second-factor code was rejected")]
    SecondFactorRejected,

    /// A second factor is required but none is pending
    #[error("No pending second-factor challenge")]
    NoPendingChallenge,

    /// Persisted challenge could not be read or written
    #[error("Challenge file {path}: {message}")]
    Challenge { path: String, message: String },

    /// Saved session could not be read or written
    #[error("Session file {path}: {message}")]
    Session { path: String, message: String },

    /// Remote failure during authentication
    #[error("Authentication request failed: {0}")]
    Remote(#[from] ClientError),
}

impl AuthError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            AuthError::SecondFactorRejected => format!(
                "{self}\n\nHint: Run the pipeline again to request a new code, then \
                 `homelake resume journal <CODE>` with the code shown on your device."
            ),
            AuthError::NoPendingChallenge => format!(
                "{self}\n\nHint: Run `homelake run journal` first; it stops and asks for a code \
                 when one is needed."
            ),
            AuthError::Session { path, .. } => format!(
                "{self}\n\nHint: Delete {path} to sign in from scratch; a new code will be needed."
            ),
            AuthError::SignInFailed { .. } => {
                format!("{self}\n\nHint: Check journal.apple_id and journal.password.")
            }
            _ => self.to_string(),
        }
    }
}
