//! Run reports

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::destination::LoadSummary;
use crate::resource::SourceOutput;
use crate::state::SourceState;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Records and state committed
    Completed,
    /// Extracted only
    DryRun,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::DryRun => write!(f, "dry run"),
        }
    }
}

/// Counters for one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub name: String,
    pub extracted: usize,
    pub written: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub columns_added: usize,
}

/// Report from a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub load_id: String,
    pub pipeline: String,
    pub dataset: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resources: Vec<ResourceReport>,
    /// Cursor state after the run
    pub state: SourceState,
}

impl LoadReport {
    pub(crate) fn new(
        load_id: &str,
        pipeline: &str,
        dataset: &str,
        started_at: DateTime<Utc>,
        output: &SourceOutput,
        summary: Option<&LoadSummary>,
    ) -> Self {
        let resources = output
            .resources
            .iter()
            .map(|resource| {
                let mut report = ResourceReport {
                    name: resource.name().to_string(),
                    extracted: resource.records.len(),
                    ..ResourceReport::default()
                };
                if let Some(table) = summary.and_then(|s| s.table(resource.name())) {
                    report.written = table.written;
                    report.skipped = table.skipped;
                    report.ignored = table.ignored;
                    report.columns_added = table.columns_added;
                }
                report
            })
            .collect();

        Self {
            load_id: load_id.to_string(),
            pipeline: pipeline.to_string(),
            dataset: dataset.to_string(),
            status: if summary.is_some() {
                RunStatus::Completed
            } else {
                RunStatus::DryRun
            },
            started_at,
            finished_at: summary.map(|s| s.finished_at).unwrap_or_else(Utc::now),
            resources,
            state: output.state.clone(),
        }
    }

    /// Check if data was committed
    pub fn is_committed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Records extracted across resources
    pub fn total_extracted(&self) -> usize {
        self.resources.iter().map(|r| r.extracted).sum()
    }

    /// Rows written across resources
    pub fn total_written(&self) -> usize {
        self.resources.iter().map(|r| r.written).sum()
    }

    /// Counters for one resource
    pub fn resource(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Run duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let ms = self.duration_ms();
        let secs = ms / 1000;
        let mins = secs / 60;
        if mins > 0 {
            format!("{}m {}s", mins, secs % 60)
        } else if secs > 0 {
            format!("{secs}s")
        } else {
            format!("{ms}ms")
        }
    }

    /// Print a summary to stderr
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("Pipeline {} load {} - {}", self.pipeline, self.load_id, self.status);
        eprintln!("Dataset: {}", self.dataset);
        eprintln!("Duration: {}", self.duration_formatted());

        if self.resources.is_empty() {
            eprintln!("No new data");
        }
        for resource in &self.resources {
            let mut line = format!(
                "  - {}: {} extracted, {} written",
                resource.name, resource.extracted, resource.written
            );
            if resource.ignored > 0 {
                line.push_str(&format!(", {} already present", resource.ignored));
            }
            if resource.skipped > 0 {
                line.push_str(&format!(", {} skipped (no primary key)", resource.skipped));
            }
            if resource.columns_added > 0 {
                line.push_str(&format!(", {} new columns", resource.columns_added));
            }
            eprintln!("{line}");
        }

        for cursor in self.state.iter() {
            eprintln!(
                "  cursor {}.{} = {}",
                cursor.resource, cursor.field, cursor.last_value
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::TableSummary;
    use crate::resource::{ResourceDeclaration, ResourceOutput};
    use chrono::Duration;
    use serde_json::json;

    fn output() -> SourceOutput {
        SourceOutput {
            resources: vec![ResourceOutput::new(
                ResourceDeclaration::new("trips"),
                vec![json!({"a": 1}).as_object().cloned().unwrap(); 3],
            )],
            state: SourceState::new(),
        }
    }

    #[test]
    fn test_report_from_summary() {
        let started = Utc::now();
        let summary = LoadSummary {
            load_id: "l".to_string(),
            tables: vec![TableSummary {
                table: "trips".to_string(),
                written: 2,
                ignored: 1,
                ..TableSummary::default()
            }],
            finished_at: started + Duration::seconds(75),
        };
        let report = LoadReport::new("l", "bikeshare", "bikeshare_data", started, &output(), Some(&summary));
        assert!(report.is_committed());
        assert_eq!(report.total_extracted(), 3);
        assert_eq!(report.total_written(), 2);
        assert_eq!(report.resource("trips").unwrap().ignored, 1);
        assert_eq!(report.duration_formatted(), "1m 15s");
    }

    #[test]
    fn test_dry_run_report() {
        let report = LoadReport::new("l", "p", "d", Utc::now(), &output(), None);
        assert_eq!(report.status, RunStatus::DryRun);
        assert_eq!(report.total_written(), 0);
        assert_eq!(report.status.to_string(), "dry run");
    }
}
