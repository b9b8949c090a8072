//! Session and generation stamps used to reject stale asynchronous results.
//!
//! Every navigator operation is split in three: a synchronous `prepare_*`
//! step that issues a [`Ticket`], an awaitable fetch that owns everything it
//! needs, and a synchronous `commit`. The ticket carries the session it was
//! issued under and a per-navigator generation. On arrival a result is
//! applied only if its session is still the active one and no newer request
//! of the same navigator has committed or been issued since.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

/// Identity of one selected-form session. `0` means no session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const NONE: SessionId = SessionId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_active(self) -> bool {
        self != Self::NONE
    }
}

/// Shared marker of the currently active session.
///
/// Clones observe the same counter, so a guard can be handed to every
/// component that commits asynchronous results.
#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    current: Arc<AtomicU64>,
    issued: Arc<AtomicU64>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session, superseding whichever one was active.
    pub fn begin(&self) -> SessionId {
        let next = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        self.current.store(next, Ordering::Release);
        SessionId(next)
    }

    /// Ends the active session; nothing dispatched so far can commit afterwards.
    pub fn end(&self) {
        self.current.store(SessionId::NONE.0, Ordering::Release);
    }

    pub fn current(&self) -> SessionId {
        SessionId(self.current.load(Ordering::Acquire))
    }

    /// Evaluated when a result arrives, never when it is dispatched.
    pub fn is_current(&self, session: SessionId) -> bool {
        session.is_active() && self.current() == session
    }
}

/// Monotonic request number within one navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Issues generations and remembers the floor below which results are stale.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    issued: u64,
    floor: u64,
}

impl GenerationCounter {
    pub fn next(&mut self) -> Generation {
        self.issued += 1;
        Generation(self.issued)
    }

    /// True when `generation` is newer than anything committed or invalidated.
    pub fn accepts(&self, generation: Generation) -> bool {
        generation.0 > self.floor && generation.0 <= self.issued
    }

    pub fn mark_committed(&mut self, generation: Generation) {
        self.floor = self.floor.max(generation.0);
    }

    /// Makes every generation issued so far stale.
    pub fn invalidate(&mut self) {
        self.floor = self.issued;
    }

    /// True when no request was issued after `generation`.
    pub fn is_latest(&self, generation: Generation) -> bool {
        generation.0 == self.issued
    }
}

/// Stamp carried by an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub session: SessionId,
    pub generation: Generation,
}

/// Result of trying to apply a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    Committed,
    /// The response was superseded and dropped without touching state.
    Stale,
}

impl CommitOutcome {
    pub fn is_committed(self) -> bool {
        self == Self::Committed
    }

    /// Converts a dropped response into [`crate::EngineError::StaleResult`], for callers that
    /// drive one request at a time and treat supersession as a failure.
    pub fn require_committed(self) -> Result<(), crate::EngineError> {
        match self {
            Self::Committed => Ok(()),
            Self::Stale => Err(crate::EngineError::StaleResult),
        }
    }
}

/// Shared staleness check: session first, then generation.
pub(crate) fn admit(guard: &SessionGuard, generations: &GenerationCounter, ticket: Ticket) -> bool {
    guard.is_current(ticket.session) && generations.accepts(ticket.generation)
}
