//! One selected-form session: navigators, search and permissions behind a single facade.
//!
//! Every asynchronous operation is offered twice: as `prepare_*`/`commit_*`
//! pairs for callers that schedule fetches themselves, and as `async`
//! conveniences that run prepare, fetch and commit in sequence. Either way
//! a result is only applied if its session is still the selected one when it
//! arrives.

use std::sync::Arc;

use serde_json::Value;
use tabula_types::{FilterValue, Row, TableMeta, parse_table_meta};
use tabula_util::ValueCodec;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::header_plan::PlannedColumn;
use crate::navigator::{
    CommitOutcome, FilterAction, FilterNavigator, FilterRequest, FilterResponse, SessionGuard, SessionId, SubRecordNavigator, SubRequest,
    SubResponse,
};
use crate::search::{RowView, SearchMode, SearchState};
use crate::snapshot::DisplaySnapshot;
use crate::source::DisplaySource;
use crate::view_model::{SearchSummary, TableView, ViewModel, format_cell};

pub struct FormSession {
    source: Arc<dyn DisplaySource>,
    guard: SessionGuard,
    session: SessionId,
    form_id: Option<i64>,
    codec: ValueCodec,
    filter: FilterNavigator,
    sub: SubRecordNavigator,
    search: SearchState,
    table_meta: Option<TableMeta>,
    last_error: Option<String>,
}

impl FormSession {
    pub fn new(source: Arc<dyn DisplaySource>, guard: SessionGuard, config: &EngineConfig) -> Self {
        Self {
            filter: FilterNavigator::new(guard.clone()),
            sub: SubRecordNavigator::new(guard.clone()),
            source,
            guard,
            session: SessionId::NONE,
            form_id: None,
            codec: config.codec(),
            search: SearchState::new(config.search.enabled, config.search_mode()),
            table_meta: None,
            last_error: None,
        }
    }

    pub fn source(&self) -> Arc<dyn DisplaySource> {
        Arc::clone(&self.source)
    }

    pub fn form_id(&self) -> Option<i64> {
        self.form_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    pub fn filter(&self) -> &FilterNavigator {
        &self.filter
    }

    pub fn sub_records(&self) -> &SubRecordNavigator {
        &self.sub
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Starts a new session for `form_id`.
    ///
    /// All state of the previous form is dropped synchronously, before any
    /// fetch can land. Results of the previous session are discarded on arrival.
    pub fn select_form(&mut self, form_id: i64) {
        let session = self.guard.begin();
        info!(form_id, session = session.get(), "form selected");
        self.session = session;
        self.form_id = Some(form_id);
        self.filter.select_form(form_id, session);
        self.sub.set_context(Some(form_id), session);
        self.search.reset();
        self.table_meta = None;
        self.last_error = None;
    }

    /// Ends the session. In-flight results will be dropped.
    pub fn close(&mut self) {
        if self.guard.is_current(self.session) {
            self.guard.end();
        }
        debug!(session = self.session.get(), "form session closed");
        self.session = SessionId::NONE;
        self.form_id = None;
        self.filter.close();
        self.sub.set_context(None, SessionId::NONE);
        self.search.reset();
        self.table_meta = None;
        self.last_error = None;
    }

    /// Switches to a new parent context with `available_orders` child views; the sub selection is cleared.
    pub fn set_parent_context(&mut self, available_orders: Vec<i64>) {
        self.sub.reset();
        self.sub.set_available_orders(available_orders);
    }

    /// Updates the child views of the current parent context, keeping the selection.
    ///
    /// Returns the refetch of the sub view when the active order had to fall back.
    pub fn prepare_sub_orders_updated(&mut self, available_orders: Vec<i64>) -> Option<SubRequest> {
        self.sub.set_available_orders(available_orders)
    }

    /// Updates the child views and reloads the sub view when the active order falls back.
    pub async fn update_sub_orders(&mut self, available_orders: Vec<i64>) -> Result<Option<CommitOutcome>, EngineError> {
        match self.prepare_sub_orders_updated(available_orders) {
            Some(request) => self.run_sub(request).await.map(Some),
            None => Ok(None),
        }
    }

    // ----- filter navigation -------------------------------------------------

    pub fn prepare_load(&mut self) -> Result<FilterRequest, EngineError> {
        self.filter.prepare_load()
    }

    pub fn prepare_nested_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<FilterRequest, EngineError> {
        self.filter.prepare_nested_filter(table_column_id, value)
    }

    pub fn prepare_tree_root_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<FilterRequest, EngineError> {
        self.filter.prepare_tree_root_filter(table_column_id, value)
    }

    pub fn prepare_reset(&mut self) -> Option<FilterRequest> {
        self.filter.prepare_reset()
    }

    /// Applies a main-view response.
    ///
    /// On commit the search index is rebuilt for the new view, and any filter
    /// change also clears the sub-record selection.
    pub fn commit_filter(&mut self, response: FilterResponse) -> Result<CommitOutcome, EngineError> {
        let action = response.action();
        let outcome = self.filter.commit(response).inspect_err(|error| self.last_error = Some(error.to_string()))?;
        if outcome.is_committed() {
            if action != FilterAction::Load {
                self.sub.clear_selection();
            }
            if let Some(snapshot) = self.filter.main_view() {
                self.search.rebuild(snapshot, &self.codec);
            }
            self.last_error = None;
        }
        Ok(outcome)
    }

    pub async fn load(&mut self) -> Result<CommitOutcome, EngineError> {
        let request = self.prepare_load()?;
        self.run_filter(request).await
    }

    /// Adds or replaces the filter on one column and reloads the main view.
    pub async fn apply_nested_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<CommitOutcome, EngineError> {
        let request = self.prepare_nested_filter(table_column_id, value)?;
        self.run_filter(request).await
    }

    /// Replaces all filters with one and opens its tree branch.
    pub async fn apply_tree_root_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<CommitOutcome, EngineError> {
        let request = self.prepare_tree_root_filter(table_column_id, value)?;
        self.run_filter(request).await
    }

    /// Clears filters and tree state and reloads the unfiltered view.
    ///
    /// Without a selected form only the local clear happens, which counts as committed.
    pub async fn reset_all(&mut self) -> Result<CommitOutcome, EngineError> {
        let Some(request) = self.prepare_reset() else {
            self.sub.clear_selection();
            return Ok(CommitOutcome::Committed);
        };
        self.run_filter(request).await
    }

    /// Closes the expanded tree branch.
    pub fn collapse_tree(&mut self) {
        self.filter.collapse();
    }

    /// Re-opens a cached tree branch.
    pub fn expand_tree(&mut self, key: &str) -> bool {
        self.filter.expand(key)
    }

    async fn run_filter(&mut self, request: FilterRequest) -> Result<CommitOutcome, EngineError> {
        let response = request.fetch(self.source.as_ref()).await;
        self.commit_filter(response)
    }

    // ----- sub-record navigation ---------------------------------------------

    pub fn prepare_row_selected(&mut self, row: &Row) -> Result<Option<SubRequest>, EngineError> {
        self.sub.prepare_row_selected(row)
    }

    pub fn prepare_sub_order_changed(&mut self, sub_order: i64) -> Option<SubRequest> {
        self.sub.prepare_sub_order_changed(sub_order)
    }

    pub fn commit_sub(&mut self, response: SubResponse) -> Result<CommitOutcome, EngineError> {
        let outcome = self.sub.commit(response).inspect_err(|error| self.last_error = Some(error.to_string()))?;
        if outcome.is_committed() {
            self.last_error = None;
        }
        Ok(outcome)
    }

    /// Row `original_index` of the main view.
    pub fn row_at(&self, original_index: usize) -> Option<&Row> {
        self.filter.main_view().and_then(|snapshot| snapshot.rows.get(original_index))
    }

    /// Selects a parent row and loads its sub view. `None` when nothing was fetched.
    pub async fn select_row(&mut self, row: &Row) -> Result<Option<CommitOutcome>, EngineError> {
        match self.prepare_row_selected(row)? {
            Some(request) => self.run_sub(request).await.map(Some),
            None => Ok(None),
        }
    }

    /// Switches the child view. Fetches only if a row has been selected.
    pub async fn change_sub_order(&mut self, sub_order: i64) -> Result<Option<CommitOutcome>, EngineError> {
        match self.prepare_sub_order_changed(sub_order) {
            Some(request) => self.run_sub(request).await.map(Some),
            None => Ok(None),
        }
    }

    async fn run_sub(&mut self, request: SubRequest) -> Result<CommitOutcome, EngineError> {
        let response = request.fetch(self.source.as_ref()).await;
        self.commit_sub(response)
    }

    // ----- permissions -------------------------------------------------------

    /// Fetches the capabilities of the table behind `widget_id`.
    pub async fn load_table_meta(&mut self, widget_id: i64) -> Result<CommitOutcome, EngineError> {
        let session = self.session;
        if !session.is_active() {
            return Err(EngineError::NoActiveForm);
        }
        let fetched = self.source.fetch_table_meta(widget_id).await;
        if !self.guard.is_current(session) || self.session != session {
            debug!(widget_id, "dropping stale table metadata");
            return Ok(CommitOutcome::Stale);
        }
        let meta = fetched
            .map_err(|error| EngineError::fetch("table_meta", error))
            .and_then(|value| parse_table_meta(&value).map_err(EngineError::from))
            .inspect_err(|error| self.last_error = Some(error.to_string()))?;
        debug!(table_id = meta.table_id, update = meta.has_update_query, "table metadata loaded");
        self.table_meta = Some(meta);
        Ok(CommitOutcome::Committed)
    }

    pub fn table_meta(&self) -> Option<&TableMeta> {
        self.table_meta.as_ref()
    }

    /// A column is editable when the plan marks it writable and the table accepts updates.
    pub fn can_edit(&self, column: &PlannedColumn) -> bool {
        !column.read_only && self.table_meta.is_some_and(|meta| meta.has_update_query)
    }

    pub fn can_insert(&self) -> bool {
        self.table_meta.is_some_and(|meta| meta.has_insert_query)
    }

    pub fn can_delete(&self) -> bool {
        self.table_meta.is_some_and(|meta| meta.has_delete_query)
    }

    // ----- cells -------------------------------------------------------------

    /// Display text of `column` in `row` of the main view.
    pub fn display_cell(&self, row: &Row, column: &PlannedColumn) -> String {
        self.filter
            .main_view()
            .map(|snapshot| format_cell(&snapshot.plan, row, column, &self.codec))
            .unwrap_or_default()
    }

    /// Edit-field text of an editable cell; `None` when the cell cannot be edited.
    pub fn editable_cell(&self, row: &Row, column: &PlannedColumn) -> Option<String> {
        if !self.can_edit(column) {
            return None;
        }
        let snapshot = self.filter.main_view()?;
        let value = snapshot.plan.resolve(row, column)?;
        Some(match (value, column.descriptor.canonical_type()) {
            (Value::String(raw), Some(kind)) => self.codec.to_editable(raw, kind),
            (other, _) => tabula_util::format_fallback(other),
        })
    }

    /// Wire value for text typed into the edit field of `column`.
    pub fn wire_value(&self, column: &PlannedColumn, text: &str) -> Value {
        match column.descriptor.canonical_type() {
            Some(kind) => Value::String(self.codec.from_editable(text, kind)),
            None => Value::String(text.to_string()),
        }
    }

    // ----- search ------------------------------------------------------------

    pub fn set_search_enabled(&mut self, enabled: bool) {
        self.search.set_enabled(enabled);
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search.set_query(query);
    }

    pub fn set_search_mode(&mut self, mode: SearchMode) {
        self.search.set_mode(mode);
    }

    /// Main-view rows matching the current search.
    pub fn visible_rows(&self) -> Result<Vec<RowView>, EngineError> {
        match self.filter.main_view() {
            Some(snapshot) => Ok(self.search.results(snapshot)?),
            None => Ok(Vec::new()),
        }
    }

    // ----- presentation ------------------------------------------------------

    pub fn view_model(&self) -> ViewModel {
        let main = self.filter.main_view().map(|snapshot| {
            let rows = self.visible_rows().unwrap_or_else(|error| {
                warn!(error = %error, "search failed; showing all rows");
                RowView::all(snapshot)
            });
            TableView::build(snapshot, &rows, &self.codec)
        });
        let sub_view = self
            .sub
            .sub_view()
            .map(|snapshot: &DisplaySnapshot| TableView::build(snapshot, &RowView::all(snapshot), &self.codec));

        ViewModel {
            form_id: self.form_id,
            session: self.session,
            phase: self.filter.phase(),
            main,
            filters: self.filter.filters().clone(),
            tree_cache: self.filter.tree_cache().clone(),
            expanded_key: self.filter.expanded_key().map(str::to_string),
            sub_selection: self.sub.selection().clone(),
            sub_view,
            search: SearchSummary {
                enabled: self.search.is_enabled(),
                query: self.search.query().to_string(),
                mode: self.search.mode(),
            },
            table_meta: self.table_meta,
            error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NullSource;
    use tabula_types::ColumnDescriptor;

    fn session() -> FormSession {
        FormSession::new(Arc::new(NullSource), SessionGuard::new(), &EngineConfig::default())
    }

    #[tokio::test]
    async fn operations_without_a_form_fail_or_noop() {
        let mut session = session();
        assert!(matches!(session.load().await, Err(EngineError::NoActiveForm)));
        assert!(matches!(session.load_table_meta(1).await, Err(EngineError::NoActiveForm)));
        assert_eq!(session.reset_all().await.expect("reset"), CommitOutcome::Committed);
        assert_eq!(session.reset_all().await.expect("reset"), CommitOutcome::Committed);
    }

    #[tokio::test]
    async fn edit_gating_needs_update_query() {
        let mut session = session();
        session.select_form(1);
        session.load_table_meta(1).await.expect("meta");

        let plan = crate::HeaderPlan::build(&[ColumnDescriptor::plain(1, 1, "Name")]);
        assert!(!session.can_edit(&plan.columns[0]));
        assert!(!session.can_insert());

        session.table_meta = Some(TableMeta {
            table_id: 1,
            has_insert_query: true,
            has_update_query: true,
            has_delete_query: false,
        });
        assert!(session.can_edit(&plan.columns[0]));
        assert!(session.can_insert());
        assert!(!session.can_delete());
    }

    #[test]
    fn wire_value_uses_the_codec_for_temporal_columns() {
        let mut config = EngineConfig::default();
        config.viewer_offset_minutes = Some(60);
        let session = FormSession::new(Arc::new(NullSource), SessionGuard::new(), &config);
        let plan = crate::HeaderPlan::build(&[
            ColumnDescriptor::plain(1, 1, "At").with_data_type("timestamptz"),
            ColumnDescriptor::plain(2, 2, "Note"),
        ]);

        assert_eq!(session.wire_value(plan.column_at(0).expect("at"), "2024-05-01 10:00"), Value::from("2024-05-01T10:00:00+01:00"));
        assert_eq!(session.wire_value(plan.column_at(1).expect("note"), "hello"), Value::from("hello"));
    }

    #[test]
    fn selecting_a_form_starts_a_fresh_session() {
        let mut session = session();
        session.select_form(1);
        let first = session.session_id();
        session.select_form(2);

        assert_ne!(first, session.session_id());
        assert_eq!(session.form_id(), Some(2));
        session.close();
        assert_eq!(session.session_id(), SessionId::NONE);
    }
}
