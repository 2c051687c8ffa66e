//! Resources and sources
//!
//! A [`Source`] groups the resources of one pipeline. Extraction returns
//! plain records plus the updated incremental state; the destination owns
//! schema mapping and write semantics.

mod declaration;

pub use declaration::{DeclarationError, ResourceDeclaration, TableReference, WriteDisposition};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::sources::ExtractError;
use crate::state::SourceState;

/// Raw record as produced by extraction
pub type Record = Map<String, Value>;

/// Records extracted for one resource
#[derive(Debug, Clone)]
pub struct ResourceOutput {
    pub declaration: ResourceDeclaration,
    pub records: Vec<Record>,
}

impl ResourceOutput {
    pub fn new(declaration: ResourceDeclaration, records: Vec<Record>) -> Self {
        Self {
            declaration,
            records,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }
}

/// Result of one extraction: records per resource plus the updated state
#[derive(Debug, Clone, Default)]
pub struct SourceOutput {
    pub resources: Vec<ResourceOutput>,
    pub state: SourceState,
}

impl SourceOutput {
    /// Total records across resources
    pub fn record_count(&self) -> usize {
        self.resources.iter().map(|r| r.records.len()).sum()
    }

    /// Records for a resource by name
    pub fn records(&self, resource: &str) -> Option<&[Record]> {
        self.resources
            .iter()
            .find(|r| r.name() == resource)
            .map(|r| r.records.as_slice())
    }
}

/// A set of resources extracted together
#[async_trait]
pub trait Source: Send + Sync {
    /// Source name, used in logs
    fn name(&self) -> &str;

    /// Declarations of every resource this source can emit
    fn resources(&self) -> Vec<ResourceDeclaration>;

    /// Extract new records given the last committed state
    async fn extract(&self, state: &SourceState) -> Result<SourceOutput, ExtractError>;
}

/// Convert a JSON value into a record.
///
/// Objects are used as-is; anything else is wrapped as `{"value": ...}`.
pub fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_record_wraps_scalars() {
        let record = into_record(json!(5));
        assert_eq!(record.get("value"), Some(&json!(5)));

        let record = into_record(json!({"id": 1}));
        assert_eq!(record.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_source_output_counts() {
        let output = SourceOutput {
            resources: vec![
                ResourceOutput::new(
                    ResourceDeclaration::new("a"),
                    vec![into_record(json!({"x": 1}))],
                ),
                ResourceOutput::new(
                    ResourceDeclaration::new("b"),
                    vec![into_record(json!({"x": 1})), into_record(json!({"x": 2}))],
                ),
            ],
            state: SourceState::new(),
        };
        assert_eq!(output.record_count(), 3);
        assert_eq!(output.records("b").map(|r| r.len()), Some(2));
        assert!(output.records("c").is_none());
    }
}
