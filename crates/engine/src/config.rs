//! Engine configuration loaded from a JSON file.
//!
//! The file lives in the standard configuration directory
//! (`~/.config/tabula/config.json` on most platforms) unless a path is passed
//! explicitly or set through [`CONFIG_PATH_ENV`]. A missing file yields the
//! defaults; so does a file that fails to parse, with a warning.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use tabula_util::{ApproximateOptions, ValueCodec};
use thiserror::Error;
use tracing::{debug, warn};

use crate::search::SearchMode;

/// Environment variable allowing callers to override the configuration file path.
pub const CONFIG_PATH_ENV: &str = "TABULA_CONFIG_PATH";

/// Default filename for the JSON payload.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Error surfaced when the configuration cannot be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure other than a missing file.
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which matcher the search box starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModeKind {
    #[default]
    Exact,
    Approximate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub mode: SearchModeKind,
    /// `0.0` = exact only, `1.0` = anything matches.
    pub threshold: f64,
    /// Positional tolerance of approximate matches, in characters.
    pub distance: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let approximate = ApproximateOptions::default();
        Self {
            enabled: true,
            mode: SearchModeKind::Exact,
            threshold: approximate.threshold,
            distance: approximate.distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Width at which the viewport scale is `1.0`.
    pub base_width: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self { base_width: 1920.0 }
    }
}

/// Settings of one engine instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    /// Fixed viewer offset east of UTC. `None` uses the host's local offset.
    pub viewer_offset_minutes: Option<i32>,
    pub viewport: ViewportConfig,
}

impl EngineConfig {
    /// Loads the configuration from `explicit_path`, or from the default location.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit_path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let config = load_payload(&path)?.sanitized();
        debug!(path = %path.display(), "engine configuration loaded");
        Ok(config)
    }

    /// Replaces out-of-range values with usable ones.
    pub fn sanitized(mut self) -> Self {
        self.search.threshold = if self.search.threshold.is_finite() {
            self.search.threshold.clamp(0.0, 1.0)
        } else {
            SearchConfig::default().threshold
        };
        if !(self.viewport.base_width.is_finite() && self.viewport.base_width > 0.0) {
            self.viewport.base_width = ViewportConfig::default().base_width;
        }
        self
    }

    pub fn search_mode(&self) -> SearchMode {
        match self.search.mode {
            SearchModeKind::Exact => SearchMode::Exact,
            SearchModeKind::Approximate => SearchMode::Approximate(self.approximate_options()),
        }
    }

    pub fn approximate_options(&self) -> ApproximateOptions {
        ApproximateOptions {
            threshold: self.search.threshold,
            distance: self.search.distance,
        }
    }

    /// Codec for the configured viewer offset.
    pub fn codec(&self) -> ValueCodec {
        match self.viewer_offset_minutes {
            Some(minutes) => ValueCodec::with_offset_minutes(minutes),
            None => ValueCodec::local(),
        }
    }
}

/// Path used when none is given explicitly.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("tabula").join(CONFIG_FILE_NAME)
}

fn load_payload(path: &Path) -> Result<EngineConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(config) => Ok(config),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse engine config; using defaults"
                );
                Ok(EngineConfig::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(EngineConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
