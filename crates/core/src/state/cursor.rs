//! Incremental cursors
//!
//! A cursor holds a single high-water mark per resource. Extraction code
//! receives the last committed value, filters out records below it and
//! reports the highest value it observed. The updated cursor is handed back
//! to the pipeline runner, which persists it together with the loaded data.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::Record;

/// Kind of scalar a cursor tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Integer sequence number or epoch timestamp
    Integer,
    /// UTC timestamp
    Timestamp,
}

/// Scalar cursor value.
///
/// Serialized as `{"type": "integer", "value": 42}` so that the kind
/// survives a round trip through the state table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorValue {
    /// Integer position
    Integer { value: i64 },
    /// Timestamp position
    Timestamp { value: DateTime<Utc> },
}

impl CursorValue {
    /// Create an integer cursor value
    pub fn integer(value: i64) -> Self {
        Self::Integer { value }
    }

    /// Create a timestamp cursor value
    pub fn timestamp(value: DateTime<Utc>) -> Self {
        Self::Timestamp { value }
    }

    /// Kind of this value
    pub fn kind(&self) -> CursorKind {
        match self {
            Self::Integer { .. } => CursorKind::Integer,
            Self::Timestamp { .. } => CursorKind::Timestamp,
        }
    }

    /// Integer payload, if this is an integer cursor
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer { value } => Some(*value),
            Self::Timestamp { .. } => None,
        }
    }

    /// Timestamp payload, if this is a timestamp cursor
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp { value } => Some(*value),
            Self::Integer { .. } => None,
        }
    }

    /// Read a cursor value of the given kind out of a JSON value.
    ///
    /// Integer cursors accept integral numbers and numeric strings.
    /// Timestamp cursors accept RFC 3339 strings and epoch seconds.
    pub fn from_json(kind: CursorKind, value: &Value) -> Option<Self> {
        match kind {
            CursorKind::Integer => match value {
                Value::Number(n) => n.as_i64().map(Self::integer),
                Value::String(s) => s.trim().parse().ok().map(Self::integer),
                _ => None,
            },
            CursorKind::Timestamp => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| Self::timestamp(dt.with_timezone(&Utc))),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .map(Self::timestamp),
                _ => None,
            },
        }
    }

    /// JSON representation used when the value is written into a record
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer { value } => Value::from(*value),
            Self::Timestamp { value } => Value::String(value.to_rfc3339()),
        }
    }

    /// Value rendered as a request parameter
    pub fn to_param(&self) -> String {
        match self {
            Self::Integer { value } => value.to_string(),
            Self::Timestamp { value } => value.to_rfc3339(),
        }
    }
}

impl PartialOrd for CursorValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer { value: a }, Self::Integer { value: b }) => Some(a.cmp(b)),
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { value } => write!(f, "{value}"),
            Self::Timestamp { value } => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

/// Persisted cursor state for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Resource the cursor belongs to
    pub resource: String,
    /// Record field the cursor reads
    pub field: String,
    /// Value the cursor starts from on the very first run
    pub initial_value: CursorValue,
    /// Last committed high-water mark
    pub last_value: CursorValue,
}

/// High-water mark tracker used during a single extraction
#[derive(Debug, Clone)]
pub struct IncrementalCursor {
    resource: String,
    field: String,
    initial_value: CursorValue,
    start_value: CursorValue,
    last_value: CursorValue,
}

impl IncrementalCursor {
    /// Create a cursor that has never been committed
    pub fn new(
        resource: impl Into<String>,
        field: impl Into<String>,
        initial_value: CursorValue,
    ) -> Self {
        Self {
            resource: resource.into(),
            field: field.into(),
            start_value: initial_value.clone(),
            last_value: initial_value.clone(),
            initial_value,
        }
    }

    /// Create a cursor, continuing from previously committed state when it
    /// is compatible (same field, same kind)
    pub fn resume(
        resource: impl Into<String>,
        field: impl Into<String>,
        initial_value: CursorValue,
        state: Option<&CursorState>,
    ) -> Self {
        let mut cursor = Self::new(resource, field, initial_value);
        if let Some(state) = state {
            if state.field == cursor.field && state.last_value.kind() == cursor.kind() {
                cursor.start_value = state.last_value.clone();
                cursor.last_value = state.last_value.clone();
            } else {
                tracing::warn!(
                    resource = %cursor.resource,
                    stored_field = %state.field,
                    field = %cursor.field,
                    "Stored cursor is incompatible, starting from initial value"
                );
            }
        }
        cursor
    }

    /// Resource name
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Field name the cursor reads from records
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Kind of scalar tracked
    pub fn kind(&self) -> CursorKind {
        self.initial_value.kind()
    }

    /// Value the cursor was seeded with
    pub fn initial_value(&self) -> &CursorValue {
        &self.initial_value
    }

    /// Value committed by the previous run (the lower bound for this run)
    pub fn start_value(&self) -> &CursorValue {
        &self.start_value
    }

    /// Highest value observed so far
    pub fn last_value(&self) -> &CursorValue {
        &self.last_value
    }

    /// True while the cursor has never advanced past its initial value
    pub fn is_initial(&self) -> bool {
        self.start_value == self.initial_value
    }

    /// Advance the cursor if `candidate` is strictly greater.
    ///
    /// Returns true when the cursor moved.
    pub fn observe(&mut self, candidate: CursorValue) -> bool {
        if candidate.partial_cmp(&self.last_value) == Some(Ordering::Greater) {
            self.last_value = candidate;
            true
        } else {
            false
        }
    }

    /// Read the cursor value from a record
    pub fn read(&self, record: &Record) -> Option<CursorValue> {
        record
            .get(&self.field)
            .and_then(|v| CursorValue::from_json(self.kind(), v))
    }

    /// Drop records below the committed value and advance over the rest.
    ///
    /// Records equal to the committed value are kept. Records whose cursor
    /// field is missing or unreadable are kept but do not move the cursor.
    pub fn apply(&mut self, records: Vec<Record>) -> Vec<Record> {
        let mut kept = Vec::with_capacity(records.len());
        let mut dropped = 0usize;
        let mut unreadable = 0usize;

        for record in records {
            match self.read(&record) {
                Some(value) => {
                    if value.partial_cmp(&self.start_value) == Some(Ordering::Less) {
                        dropped += 1;
                        continue;
                    }
                    self.observe(value);
                    kept.push(record);
                }
                None => {
                    unreadable += 1;
                    kept.push(record);
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(
                resource = %self.resource,
                dropped,
                "Filtered records below the committed cursor"
            );
        }
        if unreadable > 0 {
            tracing::warn!(
                resource = %self.resource,
                field = %self.field,
                unreadable,
                "Records without a readable cursor value"
            );
        }

        kept
    }

    /// Snapshot for persistence
    pub fn state(&self) -> CursorState {
        CursorState {
            resource: self.resource.clone(),
            field: self.field.clone(),
            initial_value: self.initial_value.clone(),
            last_value: self.last_value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cursor_value_json_format() {
        let value = CursorValue::integer(42);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, json!({"type": "integer", "value": 42}));
    }

    #[test]
    fn test_cursor_values_of_different_kinds_do_not_compare() {
        let a = CursorValue::integer(1);
        let b = CursorValue::timestamp(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(a.partial_cmp(&b), None);
    }

    #[test]
    fn test_timestamp_from_json() {
        let value = CursorValue::from_json(CursorKind::Timestamp, &json!("2023-06-01T00:00:00Z"));
        assert_eq!(
            value,
            Some(CursorValue::timestamp(
                Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
            ))
        );

        let value = CursorValue::from_json(CursorKind::Timestamp, &json!(0));
        assert_eq!(
            value.and_then(|v| v.as_timestamp()),
            Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_observe_only_advances_on_strictly_greater() {
        let mut cursor = IncrementalCursor::new("trips", "sd", CursorValue::integer(10));
        assert!(!cursor.observe(CursorValue::integer(10)));
        assert!(!cursor.observe(CursorValue::integer(5)));
        assert!(cursor.observe(CursorValue::integer(11)));
        assert_eq!(cursor.last_value(), &CursorValue::integer(11));
        assert!(!cursor.observe(CursorValue::integer(11)));
    }

    #[test]
    fn test_apply_filters_below_committed_value() {
        let state = CursorState {
            resource: "listens".to_string(),
            field: "listened_at".to_string(),
            initial_value: CursorValue::integer(0),
            last_value: CursorValue::integer(100),
        };
        let mut cursor = IncrementalCursor::resume(
            "listens",
            "listened_at",
            CursorValue::integer(0),
            Some(&state),
        );
        assert!(!cursor.is_initial());

        let kept = cursor.apply(vec![
            record(json!({"listened_at": 90})),
            record(json!({"listened_at": 100})),
            record(json!({"listened_at": 150})),
            record(json!({"listened_at": 120})),
        ]);

        assert_eq!(kept.len(), 3);
        assert_eq!(cursor.start_value(), &CursorValue::integer(100));
        assert_eq!(cursor.last_value(), &CursorValue::integer(150));
    }

    #[test]
    fn test_apply_keeps_records_without_cursor_field() {
        let mut cursor = IncrementalCursor::new("trips", "sd", CursorValue::integer(0));
        let kept = cursor.apply(vec![record(json!({"rentalId": 1}))]);
        assert_eq!(kept.len(), 1);
        assert!(cursor.is_initial());
        assert_eq!(cursor.last_value(), &CursorValue::integer(0));
    }

    #[test]
    fn test_resume_ignores_incompatible_state() {
        let state = CursorState {
            resource: "trips".to_string(),
            field: "other".to_string(),
            initial_value: CursorValue::integer(0),
            last_value: CursorValue::integer(500),
        };
        let cursor =
            IncrementalCursor::resume("trips", "sd", CursorValue::integer(0), Some(&state));
        assert!(cursor.is_initial());
    }

    #[test]
    fn test_state_snapshot() {
        let mut cursor = IncrementalCursor::new("trips", "sd", CursorValue::integer(0));
        cursor.observe(CursorValue::integer(7));
        let state = cursor.state();
        assert_eq!(state.resource, "trips");
        assert_eq!(state.initial_value, CursorValue::integer(0));
        assert_eq!(state.last_value, CursorValue::integer(7));
    }
}
