//! Incremental state
//!
//! Cursor tracking for resources that load only new records on each run.
//! State is passed explicitly: the pipeline runner reads the committed
//! [`SourceState`] from the destination, hands it to the source and persists
//! the updated copy once the load has committed.

mod cursor;
mod error;

pub use cursor::{CursorKind, CursorState, CursorValue, IncrementalCursor};
pub use error::{StateError, StateResult};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cursor state of every incremental resource in one pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceState {
    cursors: BTreeMap<String, CursorState>,
}

impl SourceState {
    /// Create empty state (first run)
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed cursor for a resource
    pub fn get(&self, resource: &str) -> Option<&CursorState> {
        self.cursors.get(resource)
    }

    /// Record a cursor, replacing any previous value for the resource
    pub fn insert(&mut self, state: CursorState) {
        self.cursors.insert(state.resource.clone(), state);
    }

    /// Iterate over cursors in resource-name order
    pub fn iter(&self) -> impl Iterator<Item = &CursorState> {
        self.cursors.values()
    }

    /// Number of tracked resources
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// True when no cursor has ever been committed
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Serialize a single cursor for storage
    pub fn encode(state: &CursorState) -> StateResult<String> {
        serde_json::to_string(state).map_err(|e| StateError::Encode {
            resource: state.resource.clone(),
            source: e,
        })
    }

    /// Deserialize a stored cursor
    pub fn decode(resource: &str, json: &str) -> StateResult<CursorState> {
        serde_json::from_str(json).map_err(|e| StateError::Decode {
            resource: resource.to_string(),
            source: e,
        })
    }
}
