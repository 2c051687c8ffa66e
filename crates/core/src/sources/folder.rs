//! Folder-to-records extraction
//!
//! Every file in a drive folder is read and parsed as JSON. Files are read
//! concurrently with bounded parallelism and their records are returned in
//! listing order. A file that cannot be read or parsed is logged and
//! skipped without affecting its siblings.

use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;

use super::error::ExtractError;
use crate::client::{Drive, DriveError, DrivePath};
use crate::resource::{Record, into_record};

/// Default number of concurrent file reads
pub const DEFAULT_WORKERS: usize = 5;

/// Counters for one folder extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub files_read: usize,
    pub files_failed: usize,
    pub records: usize,
}

/// Records from one folder plus counters
#[derive(Debug, Clone, Default)]
pub struct FolderRecords {
    pub records: Vec<Record>,
    pub stats: FolderStats,
}

/// Split a parsed document into records.
///
/// Objects become one record, arrays fan out with non-object elements
/// wrapped as `{"value": ...}`, and `null` yields nothing.
pub fn document_records(document: Value) -> Vec<Record> {
    match document {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(into_record).collect(),
        other => vec![into_record(other)],
    }
}

#[derive(Debug)]
enum FileError {
    Read(DriveError),
    Parse(serde_json::Error),
}

async fn read_document(drive: &dyn Drive, path: &DrivePath) -> Result<Value, FileError> {
    let bytes = drive.read(path).await.map_err(FileError::Read)?;
    serde_json::from_slice(&bytes).map_err(FileError::Parse)
}

/// Read a single JSON file; `None` when the file does not exist
pub async fn read_file(
    drive: &dyn Drive,
    path: &DrivePath,
) -> Result<Option<Vec<Record>>, ExtractError> {
    match read_document(drive, path).await {
        Ok(document) => Ok(Some(document_records(document))),
        Err(FileError::Read(DriveError::NotFound(_))) => Ok(None),
        Err(FileError::Read(e)) => Err(e.into()),
        Err(FileError::Parse(e)) => {
            tracing::warn!(file = %path, error = %e, "Error parsing file");
            Ok(Some(Vec::new()))
        }
    }
}

/// Read every file in `folder` into records.
///
/// A missing folder yields no records. Sub-folders are ignored.
pub async fn extract_folder(
    drive: &dyn Drive,
    folder: &DrivePath,
    workers: usize,
) -> Result<FolderRecords, ExtractError> {
    let Some(entries) = drive.list(folder).await? else {
        tracing::info!(folder = %folder, "Folder not found, nothing to extract");
        return Ok(FolderRecords::default());
    };

    let files: Vec<DrivePath> = entries
        .iter()
        .filter(|e| e.is_file())
        .map(|e| folder.join(e.name.clone()))
        .collect();
    tracing::debug!(folder = %folder, files = files.len(), workers, "Reading folder");

    let results: Vec<(&DrivePath, Result<Value, FileError>)> = stream::iter(files.iter())
        .map(|path| async move { (path, read_document(drive, path).await) })
        .buffered(workers.max(1))
        .boxed()
        .collect()
        .await;

    let mut output = FolderRecords::default();
    for (path, result) in results {
        match result {
            Ok(document) => {
                tracing::debug!(file = %path, "Processed");
                output.stats.files_read += 1;
                output.records.extend(document_records(document));
            }
            Err(FileError::Read(e)) => {
                tracing::warn!(file = %path, error = %e, "Error reading file");
                output.stats.files_failed += 1;
            }
            Err(FileError::Parse(e)) => {
                tracing::warn!(file = %path, error = %e, "Error parsing file");
                output.stats.files_failed += 1;
            }
        }
    }
    output.stats.records = output.records.len();

    tracing::info!(
        folder = %folder,
        files = output.stats.files_read,
        failed = output.stats.files_failed,
        records = output.stats.records,
        "Folder extracted"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalDrive;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_document_records() {
        assert_eq!(document_records(json!({"id": 1})).len(), 1);
        assert_eq!(document_records(json!([{"id": 1}, {"id": 2}])).len(), 2);
        assert!(document_records(Value::Null).is_empty());

        let wrapped = document_records(json!([1, {"id": 2}]));
        assert_eq!(wrapped[0].get("value"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_affect_siblings() {
        let dir = TempDir::new().unwrap();
        let items = dir.path().join("items");
        std::fs::create_dir(&items).unwrap();
        write(&items, "a.json", "{not json");
        write(&items, "b.json", r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#);

        let drive = LocalDrive::new(dir.path());
        let output = extract_folder(&drive, &DrivePath::parse("items"), 2)
            .await
            .unwrap();

        assert_eq!(output.records.len(), 3);
        assert_eq!(
            output.stats,
            FolderStats {
                files_read: 1,
                files_failed: 1,
                records: 3
            }
        );
    }

    #[tokio::test]
    async fn test_record_count_is_sum_of_files_in_order() {
        let dir = TempDir::new().unwrap();
        for i in 0..12 {
            let body = json!([{"file": i, "n": 0}, {"file": i, "n": 1}]);
            write(dir.path(), &format!("{i:02}.json"), &body.to_string());
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let drive = LocalDrive::new(dir.path());
        let output = extract_folder(&drive, &DrivePath::root(), DEFAULT_WORKERS)
            .await
            .unwrap();

        assert_eq!(output.records.len(), 24);
        let files: Vec<i64> = output
            .records
            .iter()
            .step_by(2)
            .map(|r| r["file"].as_i64().unwrap())
            .collect();
        assert_eq!(files, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_folder_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new(dir.path());
        let output = extract_folder(&drive, &DrivePath::parse("places"), 5)
            .await
            .unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.stats, FolderStats::default());
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "metadata.json", r#"{"version": 2}"#);
        let drive = LocalDrive::new(dir.path());

        let records = read_file(&drive, &DrivePath::parse("metadata.json"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records[0]["version"], json!(2));

        let missing = read_file(&drive, &DrivePath::parse("other.json")).await.unwrap();
        assert!(missing.is_none());
    }
}
