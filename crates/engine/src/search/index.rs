use std::cmp::Ordering;

use serde::Serialize;
use tabula_types::Row;
use tabula_util::{ValueCodec, approximate_score, format_fallback, normalize_search_text};

use super::{SearchError, SearchMode};
use crate::snapshot::{DisplaySnapshot, SnapshotId};

/// A row as returned by a search, with its position in the untouched data set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub original_index: usize,
    pub row: Row,
}

impl RowView {
    /// Every row of `snapshot`, in original order.
    pub fn all(snapshot: &DisplaySnapshot) -> Vec<Self> {
        snapshot
            .rows
            .iter()
            .enumerate()
            .map(|(original_index, row)| Self {
                original_index,
                row: row.clone(),
            })
            .collect()
    }
}

/// Normalized text projection of every row of one snapshot.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    snapshot_id: SnapshotId,
    rows: Vec<Row>,
    blobs: Vec<String>,
}

impl SearchIndex {
    /// Projects each row through the addressing map, visiting visible columns in render order.
    ///
    /// Both the raw value and its formatted cell text are indexed, so a date
    /// can be found as `2024-03-09` and as `09.03.2024`.
    pub fn build(snapshot: &DisplaySnapshot, codec: &ValueCodec) -> Self {
        let plan = &snapshot.plan;
        let blobs = snapshot
            .rows
            .iter()
            .map(|row| {
                let mut parts: Vec<String> = Vec::new();
                for column in plan.visible_columns() {
                    let Some(value) = plan.resolve(row, column) else {
                        continue;
                    };
                    let raw = format_fallback(value);
                    let shown = codec.display_value(value, column.descriptor.canonical_type());
                    if shown != raw && !shown.is_empty() {
                        parts.push(shown);
                    }
                    if !raw.is_empty() {
                        parts.push(raw);
                    }
                }
                normalize_search_text(&parts.join(" "))
            })
            .collect();

        Self {
            snapshot_id: snapshot.id,
            rows: snapshot.rows.to_vec(),
            blobs,
        }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Matches `query` against every row.
    ///
    /// A blank query returns all rows in original order. Exact mode keeps
    /// original order; approximate mode ranks by score, then original order.
    /// Rows containing the query verbatim always match in approximate mode.
    pub fn search(&self, query: &str, mode: SearchMode) -> Vec<RowView> {
        let query = normalize_search_text(query.trim());
        if query.is_empty() {
            return self.views(0..self.rows.len());
        }

        match mode {
            SearchMode::Exact => self.views(
                self.blobs
                    .iter()
                    .enumerate()
                    .filter(|(_, blob)| blob.contains(&query))
                    .map(|(index, _)| index),
            ),
            SearchMode::Approximate(options) => {
                let mut scored: Vec<(f64, usize)> = self
                    .blobs
                    .iter()
                    .enumerate()
                    .filter_map(|(index, blob)| {
                        if blob.contains(&query) {
                            return Some((0.0, index));
                        }
                        approximate_score(blob, &query, options).map(|score| (score, index))
                    })
                    .collect();
                scored.sort_by(|left, right| left.0.partial_cmp(&right.0).unwrap_or(Ordering::Equal).then(left.1.cmp(&right.1)));
                self.views(scored.into_iter().map(|(_, index)| index))
            }
        }
    }

    /// Like [`SearchIndex::search`], but refuses to run against a snapshot the index was not built for.
    pub fn search_checked(&self, snapshot: &DisplaySnapshot, query: &str, mode: SearchMode) -> Result<Vec<RowView>, SearchError> {
        if self.snapshot_id != snapshot.id {
            return Err(SearchError::stale(self.snapshot_id, snapshot.id));
        }
        Ok(self.search(query, mode))
    }

    fn views(&self, indices: impl Iterator<Item = usize>) -> Vec<RowView> {
        indices
            .filter_map(|original_index| {
                self.rows.get(original_index).map(|row| RowView {
                    original_index,
                    row: row.clone(),
                })
            })
            .collect()
    }
}
