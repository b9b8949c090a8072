//! # Tabula Engine
//!
//! Client-side engine that turns a backend's column metadata into a
//! navigable, filterable, searchable table without knowing the table's
//! structure in advance.
//!
//! ## Architecture
//!
//! - **`header_plan`**: render order, header groups, addressing map and read-only policy
//! - **`search`**: per-row normalized text index with exact and approximate matching
//! - **`navigator`**: filter/drill-down and sub-record navigation, with session and generation guards
//! - **`session`**: the per-form facade combining navigators, search and permissions
//! - **`source`**: the remote data-access contract
//! - **`context`**: process-wide configuration, session guard and viewport scale
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tabula_engine::{EngineConfig, EngineContext, NullSource};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = EngineContext::init(EngineConfig::default());
//! let mut session = context.open_session(Arc::new(NullSource));
//! session.select_form(1);
//! session.load().await.expect("load");
//!
//! let view = session.view_model();
//! assert_eq!(view.form_id, Some(1));
//! assert!(view.main.is_some());
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod header_plan;
pub mod navigator;
pub mod search;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod view_model;

pub use config::{ConfigError, EngineConfig, SearchConfig, SearchModeKind, ViewportConfig};
pub use context::{EngineContext, ViewportScale};
pub use error::EngineError;
pub use header_plan::{AddressKey, AddressingMap, HeaderGroup, HeaderPlan, PlannedColumn, is_read_only};
pub use navigator::{
    CommitOutcome, FilterAction, FilterNavigator, FilterPhase, FilterRequest, FilterResponse, SessionGuard, SessionId, SubRecordNavigator,
    SubRequest, SubResponse, SubSelection,
};
pub use search::{RowView, SearchError, SearchIndex, SearchMode, SearchState};
pub use session::FormSession;
pub use snapshot::{DisplaySnapshot, SnapshotId};
pub use source::{DisplaySource, NullSource};
pub use view_model::{TableView, ViewModel, ViewRow, format_cell};
