//! Navigators over the remote data of one form session.
//!
//! - `guard`: session and generation stamps for stale-result rejection
//! - `filter`: filter stack, main view and tree branches
//! - `sub_record`: parent-row selection and child views

mod filter;
mod guard;
mod sub_record;

pub use filter::{FilterAction, FilterNavigator, FilterPhase, FilterRequest, FilterResponse};
pub use guard::{CommitOutcome, Generation, GenerationCounter, SessionGuard, SessionId, Ticket};
pub use sub_record::{SubRecordNavigator, SubRequest, SubResponse, SubSelection};
