//! Configuration and secrets
//!
//! Settings come from two TOML files in a config directory, `homelake.toml`
//! for plain values and `secrets.toml` for credentials, with environment
//! variables of the form `HOMELAKE__<SECTION>__<KEY>` taking precedence.
//!
//! ```toml
//! # homelake.toml
//! [listenbrainz]
//! username = "alice"
//! start_date = "2023-01-01"
//!
//! # secrets.toml
//! [listenbrainz]
//! access_token = "..."
//! ```

mod secret;

pub use secret::Secret;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Default configuration directory
pub const DEFAULT_CONFIG_DIR: &str = ".homelake";
/// Plain configuration file name
pub const CONFIG_FILE: &str = "homelake.toml";
/// Secrets file name
pub const SECRETS_FILE: &str = "secrets.toml";
/// Environment override prefix
pub const ENV_PREFIX: &str = "HOMELAKE__";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Missing(key) => {
                let env = format!(
                    "{ENV_PREFIX}{}",
                    key.replace('.', "__").to_uppercase()
                );
                format!(
                    "Missing required setting: {key}\n\nHint: Add it to {CONFIG_FILE} or \
                     {SECRETS_FILE} in the config directory, or set {env}."
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Journal (Arc Timeline export) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub apple_id: Option<String>,
    pub password: Option<Secret>,
    /// Export folder path inside the drive
    pub root: String,
    /// Read exports from a local mirror instead of iCloud
    pub local_root: Option<PathBuf>,
    /// Concurrent file reads per folder
    #[serde(deserialize_with = "native_or_text")]
    pub workers: usize,
    pub database: Option<PathBuf>,
    pub dataset: Option<String>,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            apple_id: None,
            password: None,
            root: "Arc Editor/Exports".to_string(),
            local_root: None,
            workers: 5,
            database: None,
            dataset: None,
        }
    }
}

/// ListenBrainz settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenBrainzSettings {
    pub username: Option<String>,
    pub access_token: Option<Secret>,
    /// Initial load date, `YYYY-MM-DD` or RFC 3339
    pub start_date: Option<String>,
    pub base_url: String,
    pub database: Option<PathBuf>,
    pub dataset: Option<String>,
}

impl Default for ListenBrainzSettings {
    fn default() -> Self {
        Self {
            username: None,
            access_token: None,
            start_date: None,
            base_url: "https://api.listenbrainz.org".to_string(),
            database: None,
            dataset: None,
        }
    }
}

/// Bikeshare settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BikeshareSettings {
    pub member_id: Option<Secret>,
    pub authorization_token: Option<Secret>,
    pub base_url: String,
    #[serde(deserialize_with = "native_or_text")]
    pub accept_invalid_certs: bool,
    pub database: Option<PathBuf>,
    pub dataset: Option<String>,
}

impl Default for BikeshareSettings {
    fn default() -> Self {
        Self {
            member_id: None,
            authorization_token: None,
            base_url: "https://layer.bicyclesharing.net/mobile/v1/tor".to_string(),
            accept_invalid_certs: false,
            database: None,
            dataset: None,
        }
    }
}

/// All pipeline settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub journal: JournalSettings,
    pub listenbrainz: ListenBrainzSettings,
    pub bikeshare: BikeshareSettings,
}

impl Settings {
    /// Load from a config directory and the process environment
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config = read_optional(&dir.join(CONFIG_FILE))?;
        let secrets = read_optional(&dir.join(SECRETS_FILE))?;
        tracing::debug!(
            dir = %dir.display(),
            config = config.is_some(),
            secrets = secrets.is_some(),
            "Loading settings"
        );
        Self::from_sources(config.as_deref(), secrets.as_deref(), std::env::vars())
    }

    /// Build settings from file contents and environment pairs
    pub fn from_sources<I>(
        config: Option<&str>,
        secrets: Option<&str>,
        env: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut merged = toml::Table::new();
        if let Some(text) = config {
            merge(&mut merged, parse_table(CONFIG_FILE, text)?);
        }
        if let Some(text) = secrets {
            merge(&mut merged, parse_table(SECRETS_FILE, text)?);
        }
        apply_env(&mut merged, env);

        toml::Value::Table(merged)
            .try_into()
            .map_err(|source| ConfigError::Toml {
                path: "merged settings".to_string(),
                source,
            })
    }
}

/// Fetch a required optional setting
pub fn require<'a, T>(value: &'a Option<T>, key: &str) -> Result<&'a T, ConfigError> {
    value.as_ref().ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_table(name: &str, text: &str) -> Result<toml::Table, ConfigError> {
    text.parse::<toml::Table>()
        .map_err(|source| ConfigError::Toml {
            path: name.to_string(),
            source,
        })
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn apply_env<I>(table: &mut toml::Table, env: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in env {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let parts: Vec<String> = path
            .split("__")
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
            .collect();
        if !insert_path(table, &parts, toml::Value::String(raw)) {
            tracing::warn!(variable = %name, "Environment override conflicts with a scalar setting");
        }
    }
}

fn insert_path(table: &mut toml::Table, path: &[String], value: toml::Value) -> bool {
    match path {
        [] => false,
        [key] => {
            table.insert(key.clone(), value);
            true
        }
        [section, rest @ ..] => {
            let entry = table
                .entry(section.clone())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            match entry {
                toml::Value::Table(inner) => insert_path(inner, rest, value),
                _ => false,
            }
        }
    }
}

/// A typed value, or the same value spelled as text
#[derive(Deserialize)]
#[serde(untagged)]
enum NativeOrText<T> {
    Native(T),
    Text(String),
}

/// Accept `8` from a file and `"8"` from the environment
fn native_or_text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NativeOrText::<T>::deserialize(deserializer)? {
        NativeOrText::Native(value) => Ok(value),
        NativeOrText::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_sources(None, None, Vec::new()).unwrap();
        assert_eq!(settings.journal.root, "Arc Editor/Exports");
        assert_eq!(settings.journal.workers, 5);
        assert_eq!(settings.listenbrainz.base_url, "https://api.listenbrainz.org");
        assert!(!settings.bikeshare.accept_invalid_certs);
    }

    #[test]
    fn test_secrets_merge_over_config() {
        let config = r#"
            [listenbrainz]
            username = "alice"
            start_date = "2023-01-01"
        "#;
        let secrets = r#"
            [listenbrainz]
            access_token = "tok"
        "#;
        let settings = Settings::from_sources(Some(config), Some(secrets), Vec::new()).unwrap();
        assert_eq!(settings.listenbrainz.username.as_deref(), Some("alice"));
        assert_eq!(
            settings.listenbrainz.access_token.as_ref().map(Secret::expose),
            Some("tok")
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = "[bikeshare]\naccept_invalid_certs = false\n";
        let settings = Settings::from_sources(
            Some(config),
            None,
            env(&[
                ("HOMELAKE__BIKESHARE__ACCEPT_INVALID_CERTS", "true"),
                ("HOMELAKE__BIKESHARE__MEMBER_ID", "12345"),
                ("HOMELAKE__JOURNAL__WORKERS", "8"),
                ("HOMELAKE__LISTENBRAINZ__USERNAME", "bob"),
                ("UNRELATED", "x"),
            ]),
        )
        .unwrap();
        assert!(settings.bikeshare.accept_invalid_certs);
        assert_eq!(
            settings.bikeshare.member_id.as_ref().map(Secret::expose),
            Some("12345")
        );
        assert_eq!(settings.journal.workers, 8);
        assert_eq!(settings.listenbrainz.username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_numeric_env_value_stays_text() {
        let settings = Settings::from_sources(
            None,
            None,
            env(&[
                ("HOMELAKE__LISTENBRAINZ__USERNAME", "12345"),
                ("HOMELAKE__JOURNAL__APPLE_ID", "007"),
                ("HOMELAKE__JOURNAL__ROOT", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.listenbrainz.username.as_deref(), Some("12345"));
        assert_eq!(settings.journal.apple_id.as_deref(), Some("007"));
        assert_eq!(settings.journal.root, "true");
    }

    #[test]
    fn test_typed_settings_from_file_and_env() {
        let config = "[journal]\nworkers = 3\n[bikeshare]\naccept_invalid_certs = true\n";
        let settings = Settings::from_sources(Some(config), None, Vec::new()).unwrap();
        assert_eq!(settings.journal.workers, 3);
        assert!(settings.bikeshare.accept_invalid_certs);

        let err = Settings::from_sources(
            None,
            None,
            env(&[("HOMELAKE__JOURNAL__WORKERS", "many")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Settings::from_sources(Some("[journal"), None, Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn test_require_reports_key() {
        let settings = Settings::default();
        let err = require(&settings.listenbrainz.username, "listenbrainz.username").unwrap_err();
        assert!(err.user_message().contains("HOMELAKE__LISTENBRAINZ__USERNAME"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[journal]\nlocal_root = \"/tmp/exports\"\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(
            settings.journal.local_root,
            Some(PathBuf::from("/tmp/exports"))
        );
    }
}
