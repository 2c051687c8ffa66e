//! Destination schema mapping
//!
//! Records are flattened into columns before loading: nested objects become
//! `parent__child` columns, arrays are kept as JSON, and a value whose type
//! does not fit an existing column goes to a variant column named
//! `<column>__v_<type>`. Every row carries the `_load_id` of the load that
//! wrote it.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::resource::{Record, ResourceDeclaration, WriteDisposition};

/// Schema holding the bookkeeping tables
pub const BOOKKEEPING_SCHEMA: &str = "_homelake";
/// Column carrying the load identifier
pub const LOAD_ID_COLUMN: &str = "_load_id";
/// Separator between nested field names
pub const NESTING_SEPARATOR: &str = "__";

/// DDL for the bookkeeping tables
pub struct BookkeepingSchema;

impl BookkeepingSchema {
    /// Get the DDL for creating all bookkeeping tables (DuckDB syntax)
    pub fn create_tables_duckdb() -> &'static str {
        r#"
CREATE SCHEMA IF NOT EXISTS "_homelake";

-- One row per pipeline run
CREATE TABLE IF NOT EXISTS "_homelake"."loads" (
    load_id VARCHAR PRIMARY KEY,
    pipeline_name VARCHAR NOT NULL,
    dataset_name VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    started_at VARCHAR NOT NULL,
    finished_at VARCHAR,
    records BIGINT DEFAULT 0,
    message VARCHAR
);

-- Committed cursor per incremental resource
CREATE TABLE IF NOT EXISTS "_homelake"."pipeline_state" (
    pipeline_name VARCHAR NOT NULL,
    resource_name VARCHAR NOT NULL,
    cursor_json VARCHAR NOT NULL,
    updated_at VARCHAR NOT NULL,
    PRIMARY KEY (pipeline_name, resource_name)
);

-- Declared resources and their foreign-key hints
CREATE TABLE IF NOT EXISTS "_homelake"."resources" (
    dataset_name VARCHAR NOT NULL,
    table_name VARCHAR NOT NULL,
    primary_key VARCHAR,
    write_disposition VARCHAR NOT NULL,
    references_json VARCHAR,
    PRIMARY KEY (dataset_name, table_name)
);
"#
    }
}

/// Quote an identifier for SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Varchar,
    Json,
}

impl ColumnType {
    /// Type of a JSON value; `None` for null
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.as_i64().is_some() => Some(ColumnType::BigInt),
            Value::Number(_) => Some(ColumnType::Double),
            Value::String(_) => Some(ColumnType::Varchar),
            Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
        }
    }

    /// SQL type name
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Json => "JSON",
        }
    }

    /// Parse a type name as reported by the database
    pub fn from_sql(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "BIGINT" | "INTEGER" | "INT" | "INT8" | "SMALLINT" | "TINYINT" => ColumnType::BigInt,
            "DOUBLE" | "FLOAT" | "REAL" | "FLOAT8" => ColumnType::Double,
            "JSON" => ColumnType::Json,
            _ => ColumnType::Varchar,
        }
    }

    /// Suffix used in variant column names
    pub fn variant_suffix(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "bool",
            ColumnType::BigInt => "bigint",
            ColumnType::Double => "double",
            ColumnType::Varchar => "text",
            ColumnType::Json => "json",
        }
    }

    /// True when a value of type `other` can be stored in this column
    pub fn accepts(&self, other: ColumnType) -> bool {
        *self == other || (*self == ColumnType::Double && other == ColumnType::BigInt)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// Scalar cell bound into an insert
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn from_value(value: &Value, column: ColumnType) -> Self {
        match (column, value) {
            (ColumnType::Boolean, Value::Bool(b)) => Cell::Bool(*b),
            (ColumnType::BigInt, Value::Number(n)) => Cell::Int(n.as_i64().unwrap_or_default()),
            (ColumnType::Double, Value::Number(n)) => Cell::Float(n.as_f64().unwrap_or_default()),
            (ColumnType::Varchar, Value::String(s)) => Cell::Text(s.clone()),
            (_, other) => Cell::Text(other.to_string()),
        }
    }

    /// Stable text used to compare primary keys
    fn key_text(&self) -> String {
        match self {
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// One row: column names with their values, nulls omitted
pub type Row = Vec<(String, Cell)>;

/// Flatten nested objects into `parent__child` fields.
///
/// Arrays are kept whole. Empty objects produce no field.
pub fn flatten(record: &Record) -> Vec<(String, Value)> {
    let mut fields = Vec::new();
    flatten_into(None, record, &mut fields);
    fields
}

fn flatten_into(prefix: Option<&str>, object: &Record, fields: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{prefix}{NESTING_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(Some(&name), inner, fields),
            other => fields.push((name, other.clone())),
        }
    }
}

/// Known columns of a table, in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<(String, ColumnType)>,
}

impl TableSchema {
    pub fn new(columns: Vec<(String, ColumnType)>) -> Self {
        Self { columns }
    }

    /// True when the table does not exist yet
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, kind)| *kind)
    }

    fn add(&mut self, name: String, kind: ColumnType) {
        self.columns.push((name, kind));
    }

    /// Column a value of `kind` for field `name` is stored in, and its type
    fn resolve(
        &mut self,
        name: &str,
        kind: ColumnType,
        added: &mut Vec<(String, ColumnType)>,
    ) -> (String, ColumnType) {
        match self.column_type(name) {
            None => {
                self.add(name.to_string(), kind);
                added.push((name.to_string(), kind));
                (name.to_string(), kind)
            }
            Some(existing) if existing.accepts(kind) => (name.to_string(), existing),
            Some(_) => {
                let variant = format!("{name}{NESTING_SEPARATOR}v_{}", kind.variant_suffix());
                match self.column_type(&variant) {
                    Some(existing) if existing.accepts(kind) => (variant, existing),
                    Some(_) => (variant, ColumnType::Varchar),
                    None => {
                        self.add(variant.clone(), kind);
                        added.push((variant.clone(), kind));
                        (variant, kind)
                    }
                }
            }
        }
    }
}

/// Rows and schema changes for one table in one load
#[derive(Debug, Clone, Default)]
pub struct TablePlan {
    pub table: String,
    /// Columns to create (all columns when the table is new)
    pub new_columns: Vec<(String, ColumnType)>,
    pub rows: Vec<Row>,
    /// Rows whose primary key was missing or not a plain value
    pub skipped: usize,
    /// Rows that repeated a primary key within this load
    pub duplicates: usize,
}

/// Map records onto a table.
///
/// With a primary key, rows repeating a key within the same batch collapse
/// to one: the first for append, the last for merge.
pub fn plan_table(
    declaration: &ResourceDeclaration,
    records: &[Record],
    existing: &TableSchema,
    load_id: &str,
) -> TablePlan {
    let mut schema = existing.clone();
    let mut plan = TablePlan {
        table: declaration.name.clone(),
        ..TablePlan::default()
    };
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for record in records {
        let mut row: Row = Vec::new();
        for (name, value) in flatten(record) {
            let Some(kind) = ColumnType::of(&value) else {
                continue;
            };
            let (column, column_type) = schema.resolve(&name, kind, &mut plan.new_columns);
            row.push((column, Cell::from_value(&value, column_type)));
        }

        let key: Option<Vec<String>> = declaration
            .primary_key
            .iter()
            .map(|pk| {
                row.iter()
                    .find(|(column, _)| column == pk)
                    .map(|(_, cell)| cell.key_text())
            })
            .collect();
        let Some(key) = key else {
            plan.skipped += 1;
            continue;
        };

        let (load_column, load_type) =
            schema.resolve(LOAD_ID_COLUMN, ColumnType::Varchar, &mut plan.new_columns);
        let load_value = Value::String(load_id.to_string());
        row.push((load_column, Cell::from_value(&load_value, load_type)));

        if !declaration.has_primary_key() {
            plan.rows.push(row);
            continue;
        }

        let key = key.join("\u{1f}");
        match by_key.get(&key) {
            Some(&index) => {
                plan.duplicates += 1;
                if declaration.write_disposition == WriteDisposition::Merge {
                    plan.rows[index] = row;
                }
            }
            None => {
                by_key.insert(key, plan.rows.len());
                plan.rows.push(row);
            }
        }
    }

    if plan.skipped > 0 {
        tracing::warn!(
            table = %plan.table,
            skipped = plan.skipped,
            primary_key = ?declaration.primary_key,
            "Skipped records without a usable primary key"
        );
    }

    plan
}
