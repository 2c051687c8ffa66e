//! In-memory destination
//!
//! Applies the same schema mapping and write dispositions as the DuckDB
//! destination without a database. Used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use super::error::{DestinationError, DestinationResult};
use super::schema::{Row, TableSchema, plan_table};
use super::{Destination, LoadJob, LoadRecord, LoadStatus, LoadSummary, TableSummary};
use crate::resource::{ResourceOutput, WriteDisposition};
use crate::state::SourceState;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
    keys: HashMap<String, usize>,
}

/// Destination keeping tables, state and load history in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    tables: BTreeMap<(String, String), MemoryTable>,
    state: BTreeMap<String, SourceState>,
    loads: Vec<LoadRecord>,
    fail_on: Option<String>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load touching `table` fail (for testing rollback)
    pub fn fail_on_table(mut self, table: impl Into<String>) -> Self {
        self.fail_on = Some(table.into());
        self
    }

    /// Rows stored in a table
    pub fn rows(&self, dataset: &str, table: &str) -> &[Row] {
        self.tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    fn key_of(row: &Row, primary_key: &[String]) -> String {
        primary_key
            .iter()
            .map(|pk| {
                row.iter()
                    .find(|(column, _)| column == pk)
                    .map(|(_, cell)| format!("{cell:?}"))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    fn load_table(
        tables: &mut BTreeMap<(String, String), MemoryTable>,
        dataset: &str,
        load_id: &str,
        output: &ResourceOutput,
    ) -> TableSummary {
        let declaration = &output.declaration;
        let table = tables
            .entry((dataset.to_string(), declaration.name.clone()))
            .or_default();
        let plan = plan_table(declaration, &output.records, &table.schema, load_id);

        let mut summary = TableSummary {
            table: declaration.name.clone(),
            skipped: plan.skipped,
            ignored: plan.duplicates,
            columns_added: if table.schema.is_empty() {
                0
            } else {
                plan.new_columns.len()
            },
            ..TableSummary::default()
        };

        let mut columns = table.schema.columns().to_vec();
        columns.extend(plan.new_columns.iter().cloned());
        table.schema = TableSchema::new(columns);

        for row in plan.rows {
            if !declaration.has_primary_key() {
                table.rows.push(row);
                summary.written += 1;
                continue;
            }
            let key = Self::key_of(&row, &declaration.primary_key);
            match (table.keys.get(&key), declaration.write_disposition) {
                (Some(&index), WriteDisposition::Merge) => {
                    table.rows[index] = row;
                    summary.written += 1;
                }
                (Some(_), WriteDisposition::Append) => summary.ignored += 1,
                (None, _) => {
                    table.keys.insert(key, table.rows.len());
                    table.rows.push(row);
                    summary.written += 1;
                }
            }
        }
        summary
    }
}

impl Destination for MemoryDestination {
    fn name(&self) -> &str {
        "memory"
    }

    fn state(&self, pipeline: &str) -> DestinationResult<SourceState> {
        Ok(self.state.get(pipeline).cloned().unwrap_or_default())
    }

    fn load(&mut self, job: &LoadJob<'_>) -> DestinationResult<LoadSummary> {
        if let Some(table) = &self.fail_on {
            if job.output.resources.iter().any(|r| r.name() == table) {
                return Err(DestinationError::Database(format!(
                    "simulated failure writing '{table}'"
                )));
            }
        }

        // work on a copy so a failure leaves nothing behind
        let mut tables = self.tables.clone();
        let summaries: Vec<TableSummary> = job
            .output
            .resources
            .iter()
            .map(|output| Self::load_table(&mut tables, job.dataset, job.load_id, output))
            .collect();

        let finished_at = Utc::now();
        self.tables = tables;
        self.state
            .insert(job.pipeline.to_string(), job.output.state.clone());
        self.loads.push(LoadRecord {
            load_id: job.load_id.to_string(),
            pipeline: job.pipeline.to_string(),
            dataset: job.dataset.to_string(),
            status: LoadStatus::Completed,
            started_at: job.started_at,
            finished_at: Some(finished_at),
            records: summaries.iter().map(|t| t.written as u64).sum(),
            message: None,
        });

        Ok(LoadSummary {
            load_id: job.load_id.to_string(),
            tables: summaries,
            finished_at,
        })
    }

    fn record_failure(&mut self, record: &LoadRecord) -> DestinationResult<()> {
        self.loads.retain(|l| l.load_id != record.load_id);
        self.loads.push(record.clone());
        Ok(())
    }

    fn loads(&self, pipeline: &str, limit: usize) -> DestinationResult<Vec<LoadRecord>> {
        Ok(self
            .loads
            .iter()
            .rev()
            .filter(|l| l.pipeline == pipeline)
            .take(limit)
            .cloned()
            .collect())
    }
}
