//! Drive abstraction
//!
//! Sources that read exported files go through [`Drive`], which lists folders
//! and downloads files by path. Authentication with a second factor is split
//! into two steps: [`authenticate`] reports that a code is needed and returns
//! a [`PendingChallenge`] to persist, and [`complete_second_factor`] finishes
//! the handshake once the user supplies the code.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, DriveError};

/// Slash-separated path inside a drive
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrivePath {
    segments: Vec<String>,
}

impl DrivePath {
    /// Drive root
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `"Arc Editor/Exports"` style paths
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Child path
    pub fn join(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Kind of drive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Folder,
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
}

impl DriveEntry {
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Folder,
            size: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Read-only file tree
#[async_trait]
pub trait Drive: Send + Sync {
    /// List a folder; `None` when the folder does not exist
    async fn list(&self, path: &DrivePath) -> Result<Option<Vec<DriveEntry>>, DriveError>;

    /// Download a file
    async fn read(&self, path: &DrivePath) -> Result<Vec<u8>, DriveError>;
}

/// Authenticated drive session that may demand a second factor
#[async_trait]
pub trait DriveSession: Send + Sync {
    /// True when sign-in stopped at a second-factor prompt
    fn requires_second_factor(&self) -> bool;

    /// True when the session is remembered by the service
    fn is_trusted(&self) -> bool;

    /// Submit a second-factor code; `false` when the code is refused
    async fn validate_code(&mut self, code: &str) -> Result<bool, AuthError>;

    /// Ask the service to remember this session
    async fn trust_session(&mut self) -> Result<bool, AuthError>;

    /// Opaque context needed to continue the session in another process
    fn challenge_context(&self) -> serde_json::Value;
}

/// Second-factor challenge waiting for a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub account: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl PendingChallenge {
    pub fn new(account: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            account: account.into(),
            created_at: Utc::now(),
            context,
        }
    }

    /// Challenge file stored next to a database
    pub fn default_path(database: &Path) -> PathBuf {
        sidecar_path(database, ".challenge.json")
    }

    /// Persist the challenge
    pub async fn save(&self, path: &Path) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| challenge_error(path, e))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| challenge_error(path, e))
    }

    /// Load a persisted challenge
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::NoPendingChallenge);
            }
            Err(e) => return Err(challenge_error(path, e)),
        };
        serde_json::from_str(&json).map_err(|e| challenge_error(path, e))
    }

    /// Remove a persisted challenge if present
    pub async fn clear(path: &Path) -> Result<(), AuthError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(challenge_error(path, e)),
        }
    }
}

/// File next to a database, named `<database file><suffix>`
pub(crate) fn sidecar_path(database: &Path, suffix: &str) -> PathBuf {
    let mut name = database
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    database.with_file_name(name)
}

fn challenge_error(path: &Path, err: impl fmt::Display) -> AuthError {
    AuthError::Challenge {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Result of the first authentication step
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Session usable
    Ready,
    /// A code must be supplied before continuing
    NeedsCode(PendingChallenge),
}

/// Check whether a freshly signed-in session can be used directly
pub fn authenticate(session: &dyn DriveSession, account: &str) -> AuthOutcome {
    if session.requires_second_factor() {
        tracing::info!(account, "Two-factor authentication required");
        AuthOutcome::NeedsCode(PendingChallenge::new(account, session.challenge_context()))
    } else {
        tracing::info!(account, "Authenticated");
        AuthOutcome::Ready
    }
}

/// Validate a second-factor code and request trust for the session
pub async fn complete_second_factor(
    session: &mut dyn DriveSession,
    code: &str,
) -> Result<(), AuthError> {
    if !session.validate_code(code.trim()).await? {
        return Err(AuthError::SecondFactorRejected);
    }

    if !session.is_trusted() {
        tracing::info!("Session is not trusted, requesting trust");
        match session.trust_session().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "Failed to request trust; a new code will likely be needed in the coming weeks"
            ),
            Err(e) => tracing::warn!(error = %e, "Trust request failed"),
        }
    }

    tracing::info!("Second factor accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Scripted session for authentication tests
    struct FakeSession {
        needs_code: bool,
        trusted: bool,
        accepted_code: String,
        trust_requests: usize,
    }

    impl FakeSession {
        fn new(needs_code: bool) -> Self {
            Self {
                needs_code,
                trusted: !needs_code,
                accepted_code: "123456".to_string(),
                trust_requests: 0,
            }
        }
    }

    #[async_trait]
    impl DriveSession for FakeSession {
        fn requires_second_factor(&self) -> bool {
            self.needs_code
        }

        fn is_trusted(&self) -> bool {
            self.trusted
        }

        async fn validate_code(&mut self, code: &str) -> Result<bool, AuthError> {
            let ok = code == self.accepted_code;
            if ok {
                self.needs_code = false;
            }
            Ok(ok)
        }

        async fn trust_session(&mut self) -> Result<bool, AuthError> {
            self.trust_requests += 1;
            self.trusted = true;
            Ok(true)
        }

        fn challenge_context(&self) -> serde_json::Value {
            serde_json::json!({"session_id": "abc"})
        }
    }

    #[test]
    fn test_drive_path_parse_and_join() {
        let path = DrivePath::parse("/Arc Editor//Exports/");
        assert_eq!(path.segments(), ["Arc Editor", "Exports"]);
        assert_eq!(path.to_string(), "/Arc Editor/Exports");
        let child = path.join("items");
        assert_eq!(child.name(), Some("items"));
        assert!(DrivePath::parse("").is_root());
    }

    #[test]
    fn test_authenticate_ready_without_second_factor() {
        let session = FakeSession::new(false);
        assert_eq!(authenticate(&session, "me@example.com"), AuthOutcome::Ready);
    }

    #[test]
    fn test_authenticate_returns_challenge() {
        let session = FakeSession::new(true);
        match authenticate(&session, "me@example.com") {
            AuthOutcome::NeedsCode(challenge) => {
                assert_eq!(challenge.account, "me@example.com");
                assert_eq!(challenge.context["session_id"], "abc");
            }
            AuthOutcome::Ready => panic!("expected a challenge"),
        }
    }

    #[tokio::test]
    async fn test_complete_second_factor_trusts_session() {
        let mut session = FakeSession::new(true);
        complete_second_factor(&mut session, " 123456 ").await.unwrap();
        assert!(session.is_trusted());
        assert_eq!(session.trust_requests, 1);
    }

    #[tokio::test]
    async fn test_rejected_code_is_an_error() {
        let mut session = FakeSession::new(true);
        let err = complete_second_factor(&mut session, "000000").await.unwrap_err();
        assert!(matches!(err, AuthError::SecondFactorRejected));
        assert_eq!(session.trust_requests, 0);
    }

    #[tokio::test]
    async fn test_challenge_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("arc_timeline.duckdb");
        let path = PendingChallenge::default_path(&db);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "arc_timeline.duckdb.challenge.json"
        );

        let challenge = PendingChallenge::new("me@example.com", serde_json::json!({"scnt": "x"}));
        challenge.save(&path).await.unwrap();
        assert_eq!(PendingChallenge::load(&path).await.unwrap(), challenge);

        PendingChallenge::clear(&path).await.unwrap();
        assert!(matches!(
            PendingChallenge::load(&path).await,
            Err(AuthError::NoPendingChallenge)
        ));
        PendingChallenge::clear(&path).await.unwrap();
    }
}
