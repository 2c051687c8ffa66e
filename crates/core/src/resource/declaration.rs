//! Resource declarations
//!
//! A declaration names a destination table and describes how records are
//! written to it: primary key, write disposition and advisory references to
//! other tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How records of a resource are written to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    /// Insert rows; rows whose primary key already exists are ignored
    #[default]
    Append,
    /// Upsert rows keyed by the primary key
    Merge,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteDisposition::Append => write!(f, "append"),
            WriteDisposition::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for WriteDisposition {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteDisposition::Append),
            "merge" => Ok(WriteDisposition::Merge),
            _ => Err(DeclarationError::UnknownDisposition(s.to_string())),
        }
    }
}

/// Advisory foreign-key hint from this resource to another table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReference {
    /// Table being referenced
    pub referenced_table: String,
    /// Columns of this resource
    pub columns: Vec<String>,
    /// Matching columns of the referenced table
    pub referenced_columns: Vec<String>,
}

impl TableReference {
    /// Single-column reference
    pub fn new(
        referenced_table: impl Into<String>,
        column: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            referenced_table: referenced_table.into(),
            columns: vec![column.into()],
            referenced_columns: vec![referenced_column.into()],
        }
    }
}

/// Destination table description for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Resource and table name
    pub name: String,
    /// Primary key columns (empty when the resource has none)
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Write disposition
    #[serde(default)]
    pub write_disposition: WriteDisposition,
    /// Foreign-key hints
    #[serde(default)]
    pub references: Vec<TableReference>,
}

impl ResourceDeclaration {
    /// Append-only resource without a primary key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            write_disposition: WriteDisposition::Append,
            references: Vec::new(),
        }
    }

    /// Set a single-column primary key
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = vec![column.into()];
        self
    }

    /// Set the write disposition
    pub fn with_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = disposition;
        self
    }

    /// Add a foreign-key hint
    pub fn with_reference(mut self, reference: TableReference) -> Self {
        self.references.push(reference);
        self
    }

    /// True when a primary key is declared
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Check that the declaration is internally consistent
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.name.trim().is_empty() {
            return Err(DeclarationError::EmptyName);
        }
        if self.primary_key.iter().any(|c| c.trim().is_empty()) {
            return Err(DeclarationError::EmptyKeyColumn(self.name.clone()));
        }
        if self.write_disposition == WriteDisposition::Merge && !self.has_primary_key() {
            return Err(DeclarationError::MergeWithoutKey(self.name.clone()));
        }
        for reference in &self.references {
            if reference.columns.is_empty()
                || reference.columns.len() != reference.referenced_columns.len()
            {
                return Err(DeclarationError::InvalidReference {
                    resource: self.name.clone(),
                    referenced_table: reference.referenced_table.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Invalid resource declaration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("Resource name is empty")]
    EmptyName,

    #[error("Resource '{0}' declares an empty primary key column")]
    EmptyKeyColumn(String),

    #[error("Resource '{0}' uses merge but declares no primary key")]
    MergeWithoutKey(String),

    #[error("Resource '{resource}' has a malformed reference to '{referenced_table}'")]
    InvalidReference {
        resource: String,
        referenced_table: String,
    },

    #[error("Unknown write disposition: {0}")]
    UnknownDisposition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_roundtrip() {
        for disposition in [WriteDisposition::Append, WriteDisposition::Merge] {
            let parsed: WriteDisposition = disposition.to_string().parse().unwrap();
            assert_eq!(parsed, disposition);
        }
        assert!("replace".parse::<WriteDisposition>().is_err());
    }

    #[test]
    fn test_merge_requires_primary_key() {
        let declaration = ResourceDeclaration::new("items").with_disposition(WriteDisposition::Merge);
        assert_eq!(
            declaration.validate(),
            Err(DeclarationError::MergeWithoutKey("items".to_string()))
        );

        let declaration = declaration.with_primary_key("base__id");
        assert!(declaration.validate().is_ok());
    }

    #[test]
    fn test_reference_column_counts_must_match() {
        let declaration = ResourceDeclaration::new("items").with_reference(TableReference {
            referenced_table: "samples".to_string(),
            columns: vec!["a".to_string(), "b".to_string()],
            referenced_columns: vec!["id".to_string()],
        });
        assert!(matches!(
            declaration.validate(),
            Err(DeclarationError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_append_without_key_is_valid() {
        assert!(ResourceDeclaration::new("metadata").validate().is_ok());
    }
}
