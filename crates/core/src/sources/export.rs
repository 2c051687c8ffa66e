//! Export folder discovery
//!
//! Arc Editor writes one folder per export, named with a fixed seven
//! character prefix followed by `YYYY-MM-DD-HHMMSS`. Only the newest export
//! is loaded, and only when it is newer than the last one committed.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use super::error::ExtractError;
use crate::resource::Record;
use crate::state::{CursorValue, IncrementalCursor};

/// Length of the prefix before the export timestamp
const PREFIX_CHARS: usize = 7;
/// Timestamp format after the prefix
const DATE_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Export folder selected for loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFolder {
    pub name: String,
    pub export_date: DateTime<Utc>,
}

impl ExportFolder {
    /// Record loaded into the `exports` table
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("export".to_string(), Value::String(self.name.clone()));
        record.insert(
            "export_date".to_string(),
            Value::String(self.export_date.to_rfc3339()),
        );
        record
    }
}

/// Initial cursor for the exports resource: 2020-01-01T00:00:00Z
pub fn initial_export_cursor() -> CursorValue {
    CursorValue::timestamp(
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default(),
    )
}

/// Parse the export date out of a folder name
pub fn parse_export_date(name: &str) -> Option<DateTime<Utc>> {
    let rest: String = name.chars().skip(PREFIX_CHARS).collect();
    NaiveDateTime::parse_from_str(&rest, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pick the newest export and advance the cursor if it is newer than the
/// last committed export.
///
/// Names that do not carry a date are skipped. A listing with no dated
/// export is an error.
pub fn select_latest_export<S: AsRef<str>>(
    listing_path: &str,
    names: &[S],
    cursor: &mut IncrementalCursor,
) -> Result<Option<ExportFolder>, ExtractError> {
    let mut latest: Option<ExportFolder> = None;

    for name in names {
        let name = name.as_ref();
        let Some(export_date) = parse_export_date(name) else {
            tracing::warn!(folder = name, "Skipping folder without an export date");
            continue;
        };
        if latest.as_ref().is_none_or(|l| export_date > l.export_date) {
            latest = Some(ExportFolder {
                name: name.to_string(),
                export_date,
            });
        }
    }

    let latest = latest.ok_or_else(|| ExtractError::EmptyExportListing {
        path: listing_path.to_string(),
    })?;

    if cursor.observe(CursorValue::timestamp(latest.export_date)) {
        tracing::info!(
            export = %latest.name,
            export_date = %latest.export_date.to_rfc3339(),
            "Found new export"
        );
        Ok(Some(latest))
    } else {
        tracing::info!(last_processed = %cursor.last_value(), "No new exports");
        Ok(None)
    }
}
