//! Destinations
//!
//! A destination owns schema mapping and write semantics. It persists the
//! records of a load, the updated cursor state and a row describing the load
//! in a single transaction, and serves the committed state back to the
//! pipeline runner on the next run.

#[cfg(feature = "duckdb-backend")]
mod duckdb;
mod error;
mod memory;
pub mod schema;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbDestination;
pub use error::{DestinationError, DestinationResult};
pub use memory::MemoryDestination;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::SourceOutput;
use crate::state::SourceState;

/// Status of a recorded load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Completed,
    Failed,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::Completed => write!(f, "completed"),
            LoadStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(LoadStatus::Completed),
            "failed" => Ok(LoadStatus::Failed),
            _ => Err(format!("Unknown load status: {s}")),
        }
    }
}

/// Row in the loads table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub load_id: String,
    pub pipeline: String,
    pub dataset: String,
    pub status: LoadStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records: u64,
    pub message: Option<String>,
}

/// Everything one load writes
#[derive(Debug, Clone, Copy)]
pub struct LoadJob<'a> {
    pub load_id: &'a str,
    pub pipeline: &'a str,
    pub dataset: &'a str,
    pub started_at: DateTime<Utc>,
    pub output: &'a SourceOutput,
}

/// Per-table load counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table: String,
    /// Rows written (inserted or replaced)
    pub written: usize,
    /// Rows skipped for a missing primary key
    pub skipped: usize,
    /// Rows ignored because the key already existed (append) or repeated
    pub ignored: usize,
    /// Columns created by this load
    pub columns_added: usize,
}

/// Result of a committed load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub load_id: String,
    pub tables: Vec<TableSummary>,
    pub finished_at: DateTime<Utc>,
}

impl LoadSummary {
    /// Rows written across tables
    pub fn written(&self) -> usize {
        self.tables.iter().map(|t| t.written).sum()
    }

    /// Counters for one table
    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Persistence adapter for pipeline output
pub trait Destination: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Committed cursor state for a pipeline
    fn state(&self, pipeline: &str) -> DestinationResult<SourceState>;

    /// Write records, state and the load row atomically
    fn load(&mut self, job: &LoadJob<'_>) -> DestinationResult<LoadSummary>;

    /// Record a load that did not commit
    fn record_failure(&mut self, record: &LoadRecord) -> DestinationResult<()>;

    /// Most recent loads for a pipeline, newest first
    fn loads(&self, pipeline: &str, limit: usize) -> DestinationResult<Vec<LoadRecord>>;
}
