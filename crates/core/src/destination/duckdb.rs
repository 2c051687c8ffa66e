//! DuckDB destination
//!
//! Each dataset is a DuckDB schema and each resource a table in it. Tables
//! are created from the first batch of records and widened as new fields
//! appear: `ALTER TABLE ... ADD COLUMN` for tables without a key, a copy into
//! a rebuilt table for tables whose primary key index blocks `ALTER`. Cursor
//! state and the load history live in the `_homelake` schema.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use duckdb::Transaction;
use duckdb::types::Value as DuckValue;

use super::error::{DestinationError, DestinationResult};
use super::schema::{
    BOOKKEEPING_SCHEMA, BookkeepingSchema, Cell, ColumnType, TablePlan, TableSchema, plan_table,
    quote_ident,
};
use super::{Destination, LoadJob, LoadRecord, LoadStatus, LoadSummary, TableSummary};
use crate::resource::{ResourceOutput, WriteDisposition};
use crate::state::SourceState;

/// Destination backed by a DuckDB database file
pub struct DuckDbDestination {
    conn: duckdb::Connection,
    path: Option<PathBuf>,
}

impl DuckDbDestination {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> DestinationResult<Self> {
        let conn = duckdb::Connection::open(path).map_err(|e| DestinationError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let destination = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        destination.init()?;
        Ok(destination)
    }

    /// Open an in-memory database (for testing)
    pub fn memory() -> DestinationResult<Self> {
        let conn = duckdb::Connection::open_in_memory()?;
        let destination = Self { conn, path: None };
        destination.init()?;
        Ok(destination)
    }

    /// Database path (if not in-memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(&self) -> DestinationResult<()> {
        self.conn
            .execute_batch(BookkeepingSchema::create_tables_duckdb())?;
        Ok(())
    }

    /// Columns of an existing table; empty when the table does not exist
    pub fn table_schema(&self, dataset: &str, table: &str) -> DestinationResult<TableSchema> {
        read_table_schema(&self.conn, dataset, table)
    }

    /// Row count of a dataset table
    pub fn row_count(&self, dataset: &str, table: &str) -> DestinationResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(dataset),
            quote_ident(table)
        );
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Run a query returning a single column of text values
    pub fn query_strings(&self, sql: &str) -> DestinationResult<Vec<Option<String>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}

fn read_table_schema(
    conn: &duckdb::Connection,
    dataset: &str,
    table: &str,
) -> DestinationResult<TableSchema> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type FROM information_schema.columns
         WHERE table_schema = ?1 AND table_name = ?2
         ORDER BY ordinal_position",
    )?;
    let rows = stmt.query_map([dataset, table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        let (name, data_type) = row?;
        columns.push((name, ColumnType::from_sql(&data_type)));
    }
    Ok(TableSchema::new(columns))
}

fn to_duck(cell: &Cell) -> DuckValue {
    match cell {
        Cell::Bool(b) => DuckValue::Boolean(*b),
        Cell::Int(i) => DuckValue::BigInt(*i),
        Cell::Float(f) => DuckValue::Double(*f),
        Cell::Text(s) => DuckValue::Text(s.clone()),
    }
}

fn column_list(columns: &[(String, ColumnType)]) -> String {
    columns
        .iter()
        .map(|(name, kind)| format!("{} {}", quote_ident(name), kind.sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_table_sql(
    table: &str,
    columns: &[(String, ColumnType)],
    primary_key: &[String],
) -> String {
    let mut ddl = format!("CREATE TABLE {table} ({}", column_list(columns));
    if !primary_key.is_empty() {
        let keys: Vec<String> = primary_key.iter().map(|k| quote_ident(k)).collect();
        ddl.push_str(&format!(", PRIMARY KEY ({})", keys.join(", ")));
    }
    ddl.push(')');
    ddl
}

fn apply_schema_changes(
    tx: &Transaction<'_>,
    dataset: &str,
    output: &ResourceOutput,
    existing: &TableSchema,
    plan: &TablePlan,
) -> DestinationResult<()> {
    let table = format!("{}.{}", quote_ident(dataset), quote_ident(&plan.table));
    let primary_key = &output.declaration.primary_key;

    if existing.is_empty() {
        let ddl = create_table_sql(&table, &plan.new_columns, primary_key);
        tracing::debug!(sql = %ddl, "Creating table");
        tx.execute_batch(&ddl)?;
        return Ok(());
    }
    if plan.new_columns.is_empty() {
        return Ok(());
    }

    for (name, kind) in &plan.new_columns {
        tracing::info!(table = %plan.table, column = %name, data_type = %kind, "Adding column");
    }
    if primary_key.is_empty() {
        for (name, kind) in &plan.new_columns {
            tx.execute_batch(&format!(
                "ALTER TABLE {table} ADD COLUMN {} {}",
                quote_ident(name),
                kind.sql()
            ))?;
        }
        return Ok(());
    }

    rebuild_keyed_table(tx, &table, existing, plan, primary_key)
}

/// Widen a keyed table by copying its rows into a new table
fn rebuild_keyed_table(
    tx: &Transaction<'_>,
    table: &str,
    existing: &TableSchema,
    plan: &TablePlan,
    primary_key: &[String],
) -> DestinationResult<()> {
    let copy = quote_ident(&format!("_homelake_rebuild_{}", plan.table));
    let kept: Vec<String> = existing
        .columns()
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect();
    let mut columns = existing.columns().to_vec();
    columns.extend(plan.new_columns.iter().cloned());

    tracing::debug!(table = %plan.table, "Rebuilding keyed table");
    let sql = format!(
        "CREATE TEMP TABLE {copy} AS SELECT * FROM {table};
         DROP TABLE {table};
         {};
         INSERT INTO {table} ({kept}) SELECT {kept} FROM {copy};
         DROP TABLE {copy};",
        create_table_sql(table, &columns, primary_key),
        kept = kept.join(", "),
    );
    tx.execute_batch(&sql)?;
    Ok(())
}

fn load_table(
    tx: &Transaction<'_>,
    dataset: &str,
    load_id: &str,
    output: &ResourceOutput,
) -> DestinationResult<TableSummary> {
    let declaration = &output.declaration;
    let mut summary = TableSummary {
        table: declaration.name.clone(),
        ..TableSummary::default()
    };

    let references = serde_json::to_string(&declaration.references)
        .map_err(|e| DestinationError::schema(&declaration.name, e.to_string()))?;
    tx.execute(
        r#"INSERT OR REPLACE INTO "_homelake"."resources"
           (dataset_name, table_name, primary_key, write_disposition, references_json)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        duckdb::params![
            dataset,
            declaration.name,
            declaration.primary_key.join(","),
            declaration.write_disposition.to_string(),
            references,
        ],
    )?;

    if output.records.is_empty() {
        return Ok(summary);
    }

    let existing = read_table_schema(tx, dataset, &declaration.name)?;
    if !existing.is_empty() {
        for key in &declaration.primary_key {
            if existing.column_type(key).is_none() {
                return Err(DestinationError::schema(
                    &declaration.name,
                    format!("primary key column '{key}' is missing from the existing table"),
                ));
            }
        }
    }

    let plan = plan_table(declaration, &output.records, &existing, load_id);
    summary.skipped = plan.skipped;
    summary.ignored = plan.duplicates;
    if plan.rows.is_empty() {
        return Ok(summary);
    }

    apply_schema_changes(tx, dataset, output, &existing, &plan)?;
    summary.columns_added = if existing.is_empty() {
        0
    } else {
        plan.new_columns.len()
    };

    let verb = match (declaration.write_disposition, declaration.has_primary_key()) {
        (WriteDisposition::Merge, _) => "INSERT OR REPLACE",
        (WriteDisposition::Append, true) => "INSERT OR IGNORE",
        (WriteDisposition::Append, false) => "INSERT",
    };
    let table = format!("{}.{}", quote_ident(dataset), quote_ident(&declaration.name));

    for row in &plan.rows {
        let columns: Vec<String> = row.iter().map(|(name, _)| quote_ident(name)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "{verb} INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<DuckValue> = row.iter().map(|(_, cell)| to_duck(cell)).collect();
        let mut stmt = tx.prepare_cached(&sql)?;
        let changed = stmt.execute(duckdb::params_from_iter(values))?;
        if changed == 0 {
            summary.ignored += 1;
        } else {
            summary.written += 1;
        }
    }

    tracing::info!(
        table = %summary.table,
        written = summary.written,
        ignored = summary.ignored,
        skipped = summary.skipped,
        "Table loaded"
    );
    Ok(summary)
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl Destination for DuckDbDestination {
    fn name(&self) -> &str {
        "duckdb"
    }

    fn state(&self, pipeline: &str) -> DestinationResult<SourceState> {
        let mut stmt = self.conn.prepare(
            r#"SELECT resource_name, cursor_json FROM "_homelake"."pipeline_state"
               WHERE pipeline_name = ?1 ORDER BY resource_name"#,
        )?;
        let rows = stmt.query_map([pipeline], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut state = SourceState::new();
        for row in rows {
            let (resource, json) = row?;
            state.insert(SourceState::decode(&resource, &json)?);
        }
        Ok(state)
    }

    fn load(&mut self, job: &LoadJob<'_>) -> DestinationResult<LoadSummary> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(job.dataset)
        ))?;

        let mut tables = Vec::with_capacity(job.output.resources.len());
        for output in &job.output.resources {
            tables.push(load_table(&tx, job.dataset, job.load_id, output)?);
        }

        let now = Utc::now();
        for cursor in job.output.state.iter() {
            tx.execute(
                r#"INSERT OR REPLACE INTO "_homelake"."pipeline_state"
                   (pipeline_name, resource_name, cursor_json, updated_at)
                   VALUES (?1, ?2, ?3, ?4)"#,
                duckdb::params![
                    job.pipeline,
                    cursor.resource,
                    SourceState::encode(cursor)?,
                    now.to_rfc3339(),
                ],
            )?;
        }

        let written: usize = tables.iter().map(|t| t.written).sum();
        tx.execute(
            r#"INSERT INTO "_homelake"."loads"
               (load_id, pipeline_name, dataset_name, status, started_at, finished_at, records)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            duckdb::params![
                job.load_id,
                job.pipeline,
                job.dataset,
                LoadStatus::Completed.to_string(),
                job.started_at.to_rfc3339(),
                now.to_rfc3339(),
                written as i64,
            ],
        )?;

        tx.commit()?;
        Ok(LoadSummary {
            load_id: job.load_id.to_string(),
            tables,
            finished_at: now,
        })
    }

    fn record_failure(&mut self, record: &LoadRecord) -> DestinationResult<()> {
        self.conn.execute(
            r#"INSERT OR REPLACE INTO "_homelake"."loads"
               (load_id, pipeline_name, dataset_name, status, started_at, finished_at, records, message)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            duckdb::params![
                record.load_id,
                record.pipeline,
                record.dataset,
                record.status.to_string(),
                record.started_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
                record.records as i64,
                record.message,
            ],
        )?;
        Ok(())
    }

    fn loads(&self, pipeline: &str, limit: usize) -> DestinationResult<Vec<LoadRecord>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT load_id, pipeline_name, dataset_name, status, started_at, finished_at,
                      records, message
               FROM "_homelake"."loads"
               WHERE pipeline_name = ?1
               ORDER BY started_at DESC
               LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(duckdb::params![pipeline, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut loads = Vec::new();
        for row in rows {
            let (load_id, pipeline, dataset, status, started, finished, records, message) = row?;
            loads.push(LoadRecord {
                load_id,
                pipeline,
                dataset,
                status: status.parse().map_err(DestinationError::Database)?,
                started_at: parse_time(Some(started)).unwrap_or_default(),
                finished_at: parse_time(finished),
                records: records.unwrap_or_default().max(0) as u64,
                message,
            });
        }
        Ok(loads)
    }
}
