//! Parent-row selection and the child ("sub") view correlated to it.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tabula_types::Row;
use tracing::{debug, warn};

use super::guard::{CommitOutcome, GenerationCounter, SessionGuard, SessionId, Ticket, admit};
use crate::error::EngineError;
use crate::snapshot::DisplaySnapshot;
use crate::source::DisplaySource;

/// Which parent row is selected and which child view is shown for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubSelection {
    pub last_primary_keys: IndexMap<String, Value>,
    /// Canonical form of `last_primary_keys`: keys sorted, `k:v` pairs joined with `|`.
    pub selected_row_key: Option<String>,
    pub active_sub_order: Option<i64>,
}

impl SubSelection {
    pub fn has_selected_row(&self) -> bool {
        self.selected_row_key.is_some()
    }
}

/// A prepared sub-display fetch.
#[derive(Debug, Clone)]
pub struct SubRequest {
    ticket: Ticket,
    form_id: i64,
    sub_order: i64,
    primary_keys: IndexMap<String, Value>,
    selection: SubSelection,
}

impl SubRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn sub_order(&self) -> i64 {
        self.sub_order
    }

    pub fn primary_keys(&self) -> &IndexMap<String, Value> {
        &self.primary_keys
    }

    pub async fn fetch(self, source: &dyn DisplaySource) -> SubResponse {
        debug!(
            form_id = self.form_id,
            sub_order = self.sub_order,
            key_count = self.primary_keys.len(),
            generation = self.ticket.generation.get(),
            "fetching sub display"
        );
        let result = match source.fetch_sub_display(self.form_id, self.sub_order, &self.primary_keys).await {
            Ok(value) => DisplaySnapshot::from_value(&value).map_err(EngineError::from),
            Err(error) => Err(EngineError::fetch("sub_display", error)),
        };
        SubResponse {
            ticket: self.ticket,
            sub_order: self.sub_order,
            selection: self.selection,
            result,
        }
    }
}

/// Outcome of a [`SubRequest`], waiting to be committed.
#[derive(Debug)]
pub struct SubResponse {
    ticket: Ticket,
    sub_order: i64,
    selection: SubSelection,
    result: Result<DisplaySnapshot, EngineError>,
}

impl SubResponse {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn sub_order(&self) -> i64 {
        self.sub_order
    }
}

/// Tracks the selected parent row and the active child view.
///
/// `selection` moves as soon as a fetch is prepared. `shown` is the selection
/// the current sub view was fetched for; a failed fetch puts `selection` back
/// to it, so the two never disagree once nothing newer is in flight.
#[derive(Debug)]
pub struct SubRecordNavigator {
    guard: SessionGuard,
    session: SessionId,
    form_id: Option<i64>,
    generations: GenerationCounter,
    available_orders: Vec<i64>,
    selection: SubSelection,
    shown: SubSelection,
    sub_view: Option<DisplaySnapshot>,
}

impl SubRecordNavigator {
    pub fn new(guard: SessionGuard) -> Self {
        Self {
            guard,
            session: SessionId::NONE,
            form_id: None,
            generations: GenerationCounter::default(),
            available_orders: Vec::new(),
            selection: SubSelection::default(),
            shown: SubSelection::default(),
            sub_view: None,
        }
    }

    /// Binds to a new parent context (table, widget or form); all selection state is cleared first.
    pub fn set_context(&mut self, form_id: Option<i64>, session: SessionId) {
        self.reset();
        self.form_id = form_id;
        self.session = session;
    }

    /// Clears the selection, the active order and the sub view.
    pub fn reset(&mut self) {
        self.selection = SubSelection::default();
        self.shown = SubSelection::default();
        self.sub_view = None;
        self.generations.invalidate();
    }

    /// Forgets the selected row and its view; the active order is kept.
    pub fn clear_selection(&mut self) {
        self.selection.last_primary_keys.clear();
        self.selection.selected_row_key = None;
        self.shown = self.selection.clone();
        self.sub_view = None;
        self.generations.invalidate();
    }

    pub fn selection(&self) -> &SubSelection {
        &self.selection
    }

    pub fn sub_view(&self) -> Option<&DisplaySnapshot> {
        self.sub_view.as_ref()
    }

    pub fn available_orders(&self) -> &[i64] {
        &self.available_orders
    }

    /// Replaces the valid orders. An active order that is no longer valid falls back to the first one.
    ///
    /// A fallback drops the sub view and every fetch in flight. When a row is
    /// selected, the fetch of its view for the fallback order is returned.
    pub fn set_available_orders(&mut self, orders: Vec<i64>) -> Option<SubRequest> {
        self.available_orders = orders;
        if !self.heal_active_order() {
            return None;
        }
        self.generations.invalidate();
        self.sub_view = None;
        self.shown = self.selection.clone();
        if !self.selection.has_selected_row() {
            return None;
        }
        let form_id = self.form_id?;
        let sub_order = self.selection.active_sub_order?;
        Some(self.request(form_id, sub_order))
    }

    /// Selects `row` as the parent and prepares the fetch of its sub view.
    ///
    /// A row without primary keys is ignored. The active order is used, or
    /// the first available one when none is active yet; with no order at all
    /// the row is selected but nothing is fetched.
    pub fn prepare_row_selected(&mut self, row: &Row) -> Result<Option<SubRequest>, EngineError> {
        let Some(row_key) = row.primary_key_signature() else {
            debug!("selected row has no primary keys; ignoring");
            return Ok(None);
        };
        let form_id = self.form_id.ok_or(EngineError::NoActiveForm)?;

        self.selection.last_primary_keys = row.primary_keys.clone();
        self.selection.selected_row_key = Some(row_key);
        if self.selection.active_sub_order.is_none() {
            self.selection.active_sub_order = self.available_orders.first().copied();
        }
        let Some(sub_order) = self.selection.active_sub_order else {
            self.generations.invalidate();
            self.sub_view = None;
            self.shown = self.selection.clone();
            return Ok(None);
        };
        Ok(Some(self.request(form_id, sub_order)))
    }

    /// Switches the active order; fetches only when a row has been selected before.
    ///
    /// Orders outside the available set are refused when that set is known.
    pub fn prepare_sub_order_changed(&mut self, sub_order: i64) -> Option<SubRequest> {
        if !self.available_orders.is_empty() && !self.available_orders.contains(&sub_order) {
            warn!(sub_order, available = ?self.available_orders, "ignoring unknown sub order");
            return None;
        }
        self.selection.active_sub_order = Some(sub_order);
        if !self.selection.has_selected_row() {
            self.shown.active_sub_order = Some(sub_order);
            return None;
        }
        let form_id = self.form_id?;
        Some(self.request(form_id, sub_order))
    }

    /// Applies a fetched sub view. Stale responses are dropped silently.
    pub fn commit(&mut self, response: SubResponse) -> Result<CommitOutcome, EngineError> {
        if !admit(&self.guard, &self.generations, response.ticket) {
            debug!(
                sub_order = response.sub_order,
                generation = response.ticket.generation.get(),
                "dropping stale sub response"
            );
            return Ok(CommitOutcome::Stale);
        }
        match response.result {
            Ok(snapshot) => {
                self.generations.mark_committed(response.ticket.generation);
                self.sub_view = Some(snapshot);
                self.shown = response.selection;
                Ok(CommitOutcome::Committed)
            }
            Err(error) => {
                warn!(sub_order = response.sub_order, error = %error, "sub display fetch failed; keeping previous view");
                if self.generations.is_latest(response.ticket.generation) {
                    self.selection = self.shown.clone();
                    if !self.available_orders.is_empty() && self.heal_active_order() {
                        self.sub_view = None;
                        self.shown = self.selection.clone();
                    }
                }
                Err(error)
            }
        }
    }

    /// Moves an active order missing from the available set to the first available one.
    fn heal_active_order(&mut self) -> bool {
        let Some(active) = self.selection.active_sub_order else {
            return false;
        };
        if self.available_orders.contains(&active) {
            return false;
        }
        let fallback = self.available_orders.first().copied();
        debug!(previous = active, fallback = ?fallback, "active sub order no longer available");
        self.selection.active_sub_order = fallback;
        true
    }

    fn request(&mut self, form_id: i64, sub_order: i64) -> SubRequest {
        SubRequest {
            ticket: Ticket {
                session: self.session,
                generation: self.generations.next(),
            },
            form_id,
            sub_order,
            primary_keys: self.selection.last_primary_keys.clone(),
            selection: self.selection.clone(),
        }
    }
}
