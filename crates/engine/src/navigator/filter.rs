//! Hierarchical filter and drill-down state of one form session.

use indexmap::IndexMap;
use serde::Serialize;
use tabula_types::{Filter, FilterSet, FilterValue, TreeBranch, parse_tree_branch};
use tracing::{debug, warn};

use super::guard::{CommitOutcome, Generation, GenerationCounter, SessionGuard, SessionId, Ticket, admit};
use crate::error::EngineError;
use crate::snapshot::DisplaySnapshot;
use crate::source::DisplaySource;

/// Coarse state of the navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterPhase {
    /// No filters are active.
    Idle,
    /// Filters are active and no tree branch is open.
    Filtered,
    /// A tree branch is open.
    Expanded,
}

/// Operation a [`FilterRequest`] was prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Load,
    NestedFilter,
    TreeRootFilter,
    Reset,
}

#[derive(Debug, Clone)]
struct BranchRequest {
    key: String,
    fetch: bool,
}

/// Filter set and open branch of the newest issued request.
#[derive(Debug, Clone)]
struct PendingFilters {
    generation: Generation,
    filters: FilterSet,
    branch_key: Option<String>,
}

/// A prepared main-view fetch. Owns everything it needs, so it can be awaited
/// while the navigator keeps serving other calls.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    ticket: Ticket,
    form_id: i64,
    action: FilterAction,
    filters: FilterSet,
    branch: Option<BranchRequest>,
}

impl FilterRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn action(&self) -> FilterAction {
        self.action
    }

    /// The filter set this request fetches with.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// True when this request also fetches a tree branch.
    pub fn fetches_branch(&self) -> bool {
        self.branch.as_ref().is_some_and(|branch| branch.fetch)
    }

    /// Runs the remote calls. A tree-root request fetches the main view and the
    /// branch concurrently and succeeds only if both do.
    pub async fn fetch(self, source: &dyn DisplaySource) -> FilterResponse {
        let wire_filters = self.filters.to_filters();
        debug!(
            form_id = self.form_id,
            action = ?self.action,
            filter_count = wire_filters.len(),
            generation = self.ticket.generation.get(),
            "fetching main display"
        );

        let result = if self.fetches_branch() {
            let (main, branch) = tokio::join!(
                source.fetch_main_display(self.form_id, &wire_filters),
                source.fetch_tree_branch(self.form_id, &wire_filters)
            );
            match (main, branch) {
                (Ok(main), Ok(branch)) => DisplaySnapshot::from_value(&main)
                    .map(|snapshot| (snapshot, Some(parse_tree_branch(&branch))))
                    .map_err(EngineError::from),
                (Err(error), _) => Err(EngineError::fetch("main_display", error)),
                (_, Err(error)) => Err(EngineError::fetch("tree_branch", error)),
            }
        } else {
            match source.fetch_main_display(self.form_id, &wire_filters).await {
                Ok(main) => DisplaySnapshot::from_value(&main).map(|snapshot| (snapshot, None)).map_err(EngineError::from),
                Err(error) => Err(EngineError::fetch("main_display", error)),
            }
        };

        FilterResponse {
            ticket: self.ticket,
            action: self.action,
            filters: self.filters,
            branch_key: self.branch.map(|branch| branch.key),
            result,
        }
    }
}

/// Outcome of a [`FilterRequest`], waiting to be committed.
#[derive(Debug)]
pub struct FilterResponse {
    ticket: Ticket,
    action: FilterAction,
    filters: FilterSet,
    branch_key: Option<String>,
    result: Result<(DisplaySnapshot, Option<TreeBranch>), EngineError>,
}

impl FilterResponse {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn action(&self) -> FilterAction {
        self.action
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Active filters, the main view fetched for them and the lazily fetched tree branches.
///
/// A filter set becomes active only when the view fetched for it is committed.
/// Reset is the exception: it clears filters and tree state at once, and the
/// previous main view stays until the unfiltered view is committed.
///
/// New requests build on the newest issued request, so a nested filter added
/// while a tree-root fetch is in flight keeps the tree-root filter.
#[derive(Debug)]
pub struct FilterNavigator {
    guard: SessionGuard,
    session: SessionId,
    form_id: Option<i64>,
    generations: GenerationCounter,
    filters: FilterSet,
    main_view: Option<DisplaySnapshot>,
    tree_cache: IndexMap<String, TreeBranch>,
    expanded_key: Option<String>,
    pending: Option<PendingFilters>,
}

impl FilterNavigator {
    pub fn new(guard: SessionGuard) -> Self {
        Self {
            guard,
            session: SessionId::NONE,
            form_id: None,
            generations: GenerationCounter::default(),
            filters: FilterSet::new(),
            main_view: None,
            tree_cache: IndexMap::new(),
            expanded_key: None,
            pending: None,
        }
    }

    /// Binds the navigator to a new form session and drops all state of the previous one.
    pub fn select_form(&mut self, form_id: i64, session: SessionId) {
        self.clear();
        self.form_id = Some(form_id);
        self.session = session;
    }

    /// Unbinds the navigator. Responses still in flight will be dropped.
    pub fn close(&mut self) {
        self.clear();
        self.form_id = None;
        self.session = SessionId::NONE;
    }

    pub fn form_id(&self) -> Option<i64> {
        self.form_id
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn main_view(&self) -> Option<&DisplaySnapshot> {
        self.main_view.as_ref()
    }

    pub fn tree_cache(&self) -> &IndexMap<String, TreeBranch> {
        &self.tree_cache
    }

    pub fn expanded_key(&self) -> Option<&str> {
        self.expanded_key.as_deref()
    }

    /// The branch currently expanded, if any.
    pub fn expanded_branch(&self) -> Option<&TreeBranch> {
        self.expanded_key.as_ref().and_then(|key| self.tree_cache.get(key))
    }

    pub fn phase(&self) -> FilterPhase {
        if self.expanded_key.is_some() {
            FilterPhase::Expanded
        } else if self.filters.is_empty() {
            FilterPhase::Idle
        } else {
            FilterPhase::Filtered
        }
    }

    /// Re-fetches the main view for the active filter set.
    pub fn prepare_load(&mut self) -> Result<FilterRequest, EngineError> {
        let (filters, branch) = self.intended();
        self.request(FilterAction::Load, filters, branch)
    }

    /// Adds or replaces the filter on `table_column_id`, keeping the other active filters.
    ///
    /// The tree cache is untouched. A branch opened by an in-flight tree-root
    /// request stays open when this request commits.
    pub fn prepare_nested_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<FilterRequest, EngineError> {
        let (filters, branch) = self.intended();
        self.request(FilterAction::NestedFilter, filters.with(Filter::new(table_column_id, value)), branch)
    }

    /// Replaces the entire filter set with one filter and opens its tree branch.
    ///
    /// The branch is fetched alongside the main view unless it is already cached.
    pub fn prepare_tree_root_filter(&mut self, table_column_id: i64, value: impl Into<FilterValue>) -> Result<FilterRequest, EngineError> {
        let filter = Filter::new(table_column_id, value);
        let key = filter.tree_key();
        let fetch = !self.tree_cache.contains_key(&key);
        self.request(FilterAction::TreeRootFilter, FilterSet::single(filter), Some(BranchRequest { key, fetch }))
    }

    /// Clears filters and tree state right away, then prepares a fetch of the unfiltered view.
    ///
    /// Returns `None` when no form is selected. Calling it repeatedly is harmless.
    pub fn prepare_reset(&mut self) -> Option<FilterRequest> {
        self.filters.clear();
        self.tree_cache.clear();
        self.expanded_key = None;
        self.generations.invalidate();
        self.request(FilterAction::Reset, FilterSet::new(), None).ok()
    }

    /// Closes the expanded branch; its cache entry is kept.
    pub fn collapse(&mut self) {
        self.expanded_key = None;
    }

    /// Re-opens a cached branch without fetching. Returns `false` for an unknown key.
    pub fn expand(&mut self, key: &str) -> bool {
        if !self.tree_cache.contains_key(key) {
            return false;
        }
        self.expanded_key = Some(key.to_string());
        true
    }

    /// Applies a fetched response.
    ///
    /// Stale responses are dropped silently. A failed fetch leaves every piece
    /// of state as it was and returns the error.
    pub fn commit(&mut self, response: FilterResponse) -> Result<CommitOutcome, EngineError> {
        if !admit(&self.guard, &self.generations, response.ticket) {
            self.cache_superseded_branch(&response);
            debug!(
                action = ?response.action,
                session = response.ticket.session.get(),
                generation = response.ticket.generation.get(),
                "dropping stale filter response"
            );
            return Ok(CommitOutcome::Stale);
        }

        let (snapshot, branch) = match response.result {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!(action = ?response.action, error = %error, "filter fetch failed; keeping previous view");
                if self.is_pending(response.ticket.generation) {
                    self.pending = None;
                }
                return Err(error);
            }
        };

        if self.is_pending(response.ticket.generation) {
            self.pending = None;
        }
        self.generations.mark_committed(response.ticket.generation);
        self.filters = response.filters;
        self.main_view = Some(snapshot);
        if let Some(key) = response.branch_key {
            if let Some(branch) = branch {
                self.tree_cache.insert(key.clone(), branch);
            }
            self.expanded_key = Some(key);
        }
        debug!(
            action = ?response.action,
            filter_count = self.filters.len(),
            cached_branches = self.tree_cache.len(),
            "filter response committed"
        );
        Ok(CommitOutcome::Committed)
    }

    /// Filters and open branch of the newest request still in flight, else the committed filters.
    fn intended(&self) -> (FilterSet, Option<BranchRequest>) {
        match &self.pending {
            Some(pending) if self.generations.accepts(pending.generation) => (
                pending.filters.clone(),
                pending.branch_key.clone().map(|key| BranchRequest { key, fetch: false }),
            ),
            _ => (self.filters.clone(), None),
        }
    }

    fn is_pending(&self, generation: Generation) -> bool {
        self.pending.as_ref().is_some_and(|pending| pending.generation == generation)
    }

    /// A superseded tree-root response still holds the branch a newer request
    /// keeps open; that branch goes into the cache.
    fn cache_superseded_branch(&mut self, response: &FilterResponse) {
        if response.ticket.session != self.session || !self.guard.is_current(self.session) {
            return;
        }
        let (Some(key), Ok((_, Some(branch)))) = (&response.branch_key, &response.result) else {
            return;
        };
        let open = self.expanded_key.as_ref() == Some(key)
            || self
                .pending
                .as_ref()
                .is_some_and(|pending| self.generations.accepts(pending.generation) && pending.branch_key.as_ref() == Some(key));
        if open && !self.tree_cache.contains_key(key) {
            debug!(key = %key, "caching branch from superseded response");
            self.tree_cache.insert(key.clone(), branch.clone());
        }
    }

    fn request(&mut self, action: FilterAction, filters: FilterSet, branch: Option<BranchRequest>) -> Result<FilterRequest, EngineError> {
        let form_id = self.form_id.ok_or(EngineError::NoActiveForm)?;
        let generation = self.generations.next();
        self.pending = Some(PendingFilters {
            generation,
            filters: filters.clone(),
            branch_key: branch.as_ref().map(|branch| branch.key.clone()),
        });
        Ok(FilterRequest {
            ticket: Ticket {
                session: self.session,
                generation,
            },
            form_id,
            action,
            filters,
            branch,
        })
    }

    fn clear(&mut self) {
        self.filters.clear();
        self.main_view = None;
        self.tree_cache.clear();
        self.expanded_key = None;
        self.pending = None;
        self.generations.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NullSource;

    fn navigator() -> (SessionGuard, FilterNavigator) {
        let guard = SessionGuard::new();
        let mut navigator = FilterNavigator::new(guard.clone());
        navigator.select_form(7, guard.begin());
        (guard, navigator)
    }

    #[test]
    fn requests_need_a_form() {
        let mut navigator = FilterNavigator::new(SessionGuard::new());
        assert!(matches!(navigator.prepare_load(), Err(EngineError::NoActiveForm)));
        assert!(navigator.prepare_reset().is_none());
        assert!(navigator.prepare_reset().is_none());
    }

    #[test]
    fn nested_filter_replaces_same_column() {
        let (_, mut navigator) = navigator();
        navigator.filters = FilterSet::single(Filter::new(5, "A")).with(Filter::new(7, "B"));

        let request = navigator.prepare_nested_filter(5, "C").expect("request");
        assert_eq!(request.filters().to_filters(), vec![Filter::new(5, "C"), Filter::new(7, "B")]);
        assert_eq!(navigator.filters().get(5), Some(&FilterValue::from("A")));
    }

    #[test]
    fn cached_branch_is_not_fetched_again() {
        let (_, mut navigator) = navigator();
        assert!(navigator.prepare_tree_root_filter(5, "A").expect("request").fetches_branch());

        navigator.tree_cache.insert("5-A".into(), vec![]);
        assert!(!navigator.prepare_tree_root_filter(5, "A").expect("request").fetches_branch());
    }

    #[tokio::test]
    async fn tree_root_commit_expands_branch_and_collapse_keeps_cache() {
        let (_, mut navigator) = navigator();
        let response = navigator.prepare_tree_root_filter(5, "A").expect("request").fetch(&NullSource).await;
        assert_eq!(navigator.commit(response).expect("commit"), CommitOutcome::Committed);

        assert_eq!(navigator.phase(), FilterPhase::Expanded);
        assert_eq!(navigator.expanded_key(), Some("5-A"));
        assert_eq!(navigator.expanded_branch(), Some(&Vec::new()));

        navigator.collapse();
        assert_eq!(navigator.phase(), FilterPhase::Filtered);
        assert!(navigator.tree_cache().contains_key("5-A"));
        assert!(navigator.expand("5-A"));
        assert!(!navigator.expand("9-Z"));
    }

    #[tokio::test]
    async fn older_response_cannot_overwrite_newer_commit() {
        let (_, mut navigator) = navigator();
        let older = navigator.prepare_nested_filter(5, "old").expect("request");
        let newer = navigator.prepare_nested_filter(5, "new").expect("request");

        let newer = newer.fetch(&NullSource).await;
        let older = older.fetch(&NullSource).await;
        assert_eq!(navigator.commit(newer).expect("commit"), CommitOutcome::Committed);
        assert_eq!(navigator.commit(older).expect("commit"), CommitOutcome::Stale);
        assert_eq!(navigator.filters().get(5), Some(&FilterValue::from("new")));
    }

    #[test]
    fn nested_request_builds_on_in_flight_tree_root() {
        let (_, mut navigator) = navigator();
        navigator.filters = FilterSet::single(Filter::new(9, "old"));

        navigator.prepare_tree_root_filter(5, "A").expect("request");
        let nested = navigator.prepare_nested_filter(7, "B").expect("request");
        assert_eq!(nested.filters().to_filters(), vec![Filter::new(5, "A"), Filter::new(7, "B")]);
        assert!(!nested.fetches_branch());

        navigator.prepare_reset().expect("reset request");
        let after_reset = navigator.prepare_nested_filter(7, "C").expect("request");
        assert_eq!(after_reset.filters().to_filters(), vec![Filter::new(7, "C")]);
    }

    #[tokio::test]
    async fn superseded_tree_root_still_fills_the_open_branch() {
        let (_, mut navigator) = navigator();
        let tree_root = navigator.prepare_tree_root_filter(5, "A").expect("request");
        let nested = navigator.prepare_nested_filter(7, "B").expect("request");

        let nested = nested.fetch(&NullSource).await;
        let tree_root = tree_root.fetch(&NullSource).await;
        assert_eq!(navigator.commit(nested).expect("commit"), CommitOutcome::Committed);
        assert_eq!(navigator.expanded_key(), Some("5-A"));
        assert_eq!(navigator.commit(tree_root).expect("commit"), CommitOutcome::Stale);

        assert!(navigator.tree_cache().contains_key("5-A"));
        assert_eq!(navigator.filters().len(), 2);
    }

    #[tokio::test]
    async fn reset_invalidates_in_flight_requests() {
        let (_, mut navigator) = navigator();
        let pending = navigator.prepare_nested_filter(5, "A").expect("request").fetch(&NullSource).await;
        let reset = navigator.prepare_reset().expect("reset request");
        assert_eq!(navigator.phase(), FilterPhase::Idle);

        assert_eq!(navigator.commit(pending).expect("commit"), CommitOutcome::Stale);
        assert_eq!(navigator.commit(reset.fetch(&NullSource).await).expect("commit"), CommitOutcome::Committed);
        assert!(navigator.filters().is_empty());
    }

    #[tokio::test]
    async fn response_from_previous_session_is_dropped() {
        let (guard, mut navigator) = navigator();
        let pending = navigator.prepare_load().expect("request").fetch(&NullSource).await;

        navigator.select_form(8, guard.begin());
        assert_eq!(navigator.commit(pending).expect("commit"), CommitOutcome::Stale);
        assert!(navigator.main_view().is_none());
    }
}
