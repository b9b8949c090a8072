//! In-memory row search over the current display snapshot.
//!
//! [`SearchIndex`] holds one normalized text blob per row; [`SearchState`]
//! owns the caller-facing switches (enabled flag, query, mode) and the index
//! built for the snapshot currently on screen.

mod index;

pub use index::{RowView, SearchIndex};

use serde::{Deserialize, Serialize};
use tabula_util::{ApproximateOptions, ValueCodec};
use thiserror::Error;

use crate::snapshot::{DisplaySnapshot, SnapshotId};

/// Errors emitted by search operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    /// The index was built for a different display fetch than the one being searched.
    #[error("search index built for snapshot {index} queried against snapshot {snapshot}")]
    StaleIndex { index: u64, snapshot: u64 },

    /// A query was issued before any index was built.
    #[error("search index has not been built")]
    NotBuilt,
}

impl SearchError {
    pub(crate) fn stale(index: SnapshotId, snapshot: SnapshotId) -> Self {
        Self::StaleIndex {
            index: index.get(),
            snapshot: snapshot.get(),
        }
    }
}

/// How a query is matched against a row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SearchMode {
    /// Normalized substring containment.
    #[default]
    Exact,
    /// Typo tolerant matching.
    Approximate(ApproximateOptions),
}

/// Search switches plus the index for the snapshot on screen.
#[derive(Debug, Clone)]
pub struct SearchState {
    enabled: bool,
    query: String,
    mode: SearchMode,
    index: Option<SearchIndex>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new(true, SearchMode::Exact)
    }
}

impl SearchState {
    pub fn new(enabled: bool, mode: SearchMode) -> Self {
        Self {
            enabled,
            query: String::new(),
            mode,
            index: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Disabling search also clears the query.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.query.clear();
        }
    }

    /// Ignored while search is disabled.
    pub fn set_query(&mut self, query: impl Into<String>) {
        if self.enabled {
            self.query = query.into();
        }
    }

    pub fn set_mode(&mut self, mode: SearchMode) {
        self.mode = mode;
    }

    /// Rebuilds the index for `snapshot`. Must be called on every display change.
    pub fn rebuild(&mut self, snapshot: &DisplaySnapshot, codec: &ValueCodec) {
        self.index = Some(SearchIndex::build(snapshot, codec));
    }

    /// Drops the index and the query; used when the form session ends.
    pub fn reset(&mut self) {
        self.index = None;
        self.query.clear();
    }

    /// Rows of `snapshot` matching the current query.
    ///
    /// With search disabled or a blank query every row is returned in
    /// original order, index or not.
    pub fn results(&self, snapshot: &DisplaySnapshot) -> Result<Vec<RowView>, SearchError> {
        if !self.enabled || self.query.trim().is_empty() {
            return Ok(RowView::all(snapshot));
        }
        let index = self.index.as_ref().ok_or(SearchError::NotBuilt)?;
        index.search_checked(snapshot, &self.query, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;
    use tabula_types::{ColumnDescriptor, Row};

    fn snapshot() -> DisplaySnapshot {
        let rows = ["Zeta", "Alpha", "Gamma"]
            .into_iter()
            .map(|name| Row::new(IndexMap::new(), vec![json!(name)]))
            .collect();
        DisplaySnapshot::new(vec![ColumnDescriptor::plain(1, 1, "Name")], rows)
    }

    #[test]
    fn disabling_search_clears_the_query() {
        let mut state = SearchState::default();
        state.set_query("alpha");
        state.set_enabled(false);
        assert_eq!(state.query(), "");

        state.set_query("ignored");
        assert_eq!(state.query(), "");
    }

    #[test]
    fn blank_query_returns_everything_in_order_for_both_modes() {
        let snapshot = snapshot();
        for mode in [SearchMode::Exact, SearchMode::Approximate(ApproximateOptions::default())] {
            let mut state = SearchState::new(true, mode);
            state.set_query("   ");
            let indices: Vec<usize> = state.results(&snapshot).expect("results").iter().map(|view| view.original_index).collect();
            assert_eq!(indices, vec![0, 1, 2]);
        }
    }

    #[test]
    fn stale_index_is_refused() {
        let codec = ValueCodec::with_offset_minutes(0);
        let first = snapshot();
        let second = snapshot();
        let mut state = SearchState::default();
        state.rebuild(&first, &codec);
        state.set_query("alpha");

        assert!(matches!(state.results(&second), Err(SearchError::StaleIndex { .. })));
        assert_eq!(state.results(&first).expect("fresh index").len(), 1);
    }

    #[test]
    fn query_without_index_is_an_error() {
        let mut state = SearchState::default();
        state.set_query("alpha");
        assert_eq!(state.results(&snapshot()).err(), Some(SearchError::NotBuilt));
    }
}
