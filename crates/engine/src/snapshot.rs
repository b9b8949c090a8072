//! Validated display payloads paired with their header plan.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use serde_json::Value;
use tabula_types::{ColumnDescriptor, PayloadError, Row, parse_display_payload};
use tracing::warn;

use crate::header_plan::HeaderPlan;

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stamp of one display fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    fn next() -> Self {
        Self(NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// One display payload and the plan computed for it. Cheap to clone.
#[derive(Debug, Clone, Serialize)]
pub struct DisplaySnapshot {
    pub id: SnapshotId,
    pub columns: Arc<[ColumnDescriptor]>,
    pub rows: Arc<[Row]>,
    pub plan: Arc<HeaderPlan>,
}

impl DisplaySnapshot {
    /// Builds a snapshot from already validated columns and rows.
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        let plan = HeaderPlan::build(&columns);
        Self {
            id: SnapshotId::next(),
            columns: columns.into(),
            rows: rows.into(),
            plan: Arc::new(plan),
        }
    }

    /// Validates a raw display response. Column degradations are logged, not returned.
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let validated = parse_display_payload(value)?;
        for issue in &validated.issues {
            warn!(issue = %issue, "display payload degraded");
        }
        Ok(Self::new(validated.payload.columns, validated.payload.data))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_snapshot_gets_a_fresh_id() {
        let first = DisplaySnapshot::empty();
        let second = DisplaySnapshot::empty();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn from_value_validates_and_plans() {
        let value = json!({
            "columns": [
                {"widget_column_id": 1, "table_column_id": 10, "column_name": "Name", "kind": "plain"},
                {"widget_column_id": 2, "kind": "combobox", "column_name": "Broken"}
            ],
            "data": [{"primary_keys": {"id": 1}, "values": ["Ada"]}]
        });
        let snapshot = DisplaySnapshot::from_value(&value).expect("valid payload");

        assert_eq!(snapshot.row_count(), 1);
        assert_eq!(snapshot.rows[0].values, vec![json!("Ada"), Value::Null]);
        assert_eq!(snapshot.plan.groups.len(), 2);
        assert!(!snapshot.columns[1].is_combobox());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(DisplaySnapshot::from_value(&json!([1, 2])).is_err());
    }
}
