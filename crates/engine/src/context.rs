//! Process-wide engine context.
//!
//! Owns the configuration, the session guard shared by every form session,
//! and the viewport scale observable. Create one at application start with
//! [`EngineContext::init`] and call [`EngineContext::teardown`] on shutdown.

use std::sync::Arc;

use serde::Serialize;
use tabula_util::ValueCodec;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::navigator::SessionGuard;
use crate::session::FormSession;
use crate::source::DisplaySource;

const MIN_SCALE: f64 = 0.5;
const MAX_SCALE: f64 = 2.0;

/// Current viewport width and the scale factor derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportScale {
    pub width: f64,
    pub scale: f64,
}

impl ViewportScale {
    /// Scale is `width / base_width`, clamped to `[0.5, 2.0]`.
    pub fn compute(width: f64, base_width: f64) -> Self {
        let scale = if width.is_finite() && width > 0.0 && base_width > 0.0 {
            (width / base_width).clamp(MIN_SCALE, MAX_SCALE)
        } else {
            1.0
        };
        Self { width, scale }
    }
}

pub struct EngineContext {
    config: EngineConfig,
    guard: SessionGuard,
    viewport: Option<watch::Sender<ViewportScale>>,
    last_scale: ViewportScale,
}

impl EngineContext {
    pub fn init(config: EngineConfig) -> Self {
        let initial = ViewportScale::compute(config.viewport.base_width, config.viewport.base_width);
        let (sender, _) = watch::channel(initial);
        info!(
            search_enabled = config.search.enabled,
            viewer_offset = ?config.viewer_offset_minutes,
            "engine context initialized"
        );
        Self {
            config,
            guard: SessionGuard::new(),
            viewport: Some(sender),
            last_scale: initial,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> ValueCodec {
        self.config.codec()
    }

    pub fn session_guard(&self) -> SessionGuard {
        self.guard.clone()
    }

    /// Opens a form session bound to this context's guard and settings.
    pub fn open_session(&self, source: Arc<dyn DisplaySource>) -> FormSession {
        FormSession::new(source, self.session_guard(), &self.config)
    }

    /// Receives every scale change. Dropping the receiver unsubscribes.
    ///
    /// Returns `None` after teardown.
    pub fn subscribe(&self) -> Option<watch::Receiver<ViewportScale>> {
        self.viewport.as_ref().map(watch::Sender::subscribe)
    }

    /// Current scale, without subscribing.
    pub fn snapshot(&self) -> ViewportScale {
        self.viewport.as_ref().map(|sender| *sender.borrow()).unwrap_or(self.last_scale)
    }

    /// Recomputes the scale for a new viewport width. Subscribers are notified only on change.
    pub fn resize(&mut self, width: f64) {
        let next = ViewportScale::compute(width, self.config.viewport.base_width);
        self.last_scale = next;
        if let Some(sender) = &self.viewport {
            let changed = sender.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
            debug!(width, scale = next.scale, changed, "viewport resized");
        }
    }

    /// Closes the observable and ends any active form session.
    pub fn teardown(&mut self) {
        self.guard.end();
        if self.viewport.take().is_some() {
            info!("engine context torn down");
        }
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.teardown();
    }
}
