//! Filesystem-backed drive
//!
//! Reads a local mirror of a drive folder (for example an iCloud Drive folder
//! synced by the operating system). No authentication is involved.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::drive::{Drive, DriveEntry, DrivePath};
use super::error::DriveError;

/// Drive rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: PathBuf,
}

impl LocalDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &DrivePath) -> PathBuf {
        let mut resolved = self.root.clone();
        for segment in path.segments() {
            resolved.push(segment);
        }
        resolved
    }
}

fn io_error(path: &Path, source: std::io::Error) -> DriveError {
    DriveError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl Drive for LocalDrive {
    async fn list(&self, path: &DrivePath) -> Result<Option<Vec<DriveEntry>>, DriveError> {
        let dir = self.resolve(path);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| io_error(&entry.path(), e))?;
            if metadata.is_dir() {
                entries.push(DriveEntry::folder(name));
            } else {
                entries.push(DriveEntry::file(name, Some(metadata.len())));
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    async fn read(&self, path: &DrivePath) -> Result<Vec<u8>, DriveError> {
        let file = self.resolve(path);
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriveError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(&file, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_sorted_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("items")).unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "[]").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "").unwrap();

        let drive = LocalDrive::new(dir.path());
        let entries = drive.list(&DrivePath::root()).await.unwrap().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.json", "b.json", "items"]);
        assert!(!entries[2].is_file());
        assert_eq!(entries[0].size, Some(2));
    }

    #[tokio::test]
    async fn test_missing_folder_is_none() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new(dir.path());
        assert!(drive.list(&DrivePath::parse("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new(dir.path());
        let err = drive.read(&DrivePath::parse("x/metadata.json")).await.unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }
}
