//! Error types surfaced by the engine.

use tabula_types::PayloadError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::search::SearchError;

/// Recoverable failures of engine operations.
///
/// None of these leave a navigator in a partially updated state: the state
/// visible before the failing operation is kept as it was.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Fetch failed: {operation} - {message}")]
    Fetch { operation: &'static str, message: String },

    #[error("Malformed display payload: {0}")]
    MalformedSchema(#[from] PayloadError),

    #[error("Result belongs to a superseded session or request")]
    StaleResult,

    #[error("No form is selected")]
    NoActiveForm,

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Wraps a remote failure, keeping the whole context chain in the message.
    pub fn fetch(operation: &'static str, error: anyhow::Error) -> Self {
        Self::Fetch {
            operation,
            message: format!("{error:#}"),
        }
    }

    /// True for failures the user can retry without changing anything.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn fetch_error_keeps_context_chain() {
        let error = anyhow!("connection reset").context("loading main display");
        let wrapped = EngineError::fetch("main_display", error);

        assert!(wrapped.is_fetch());
        assert_eq!(wrapped.to_string(), "Fetch failed: main_display - loading main display: connection reset");
    }
}
