//! Collapsible panels, loading indicator, and the last-update stamp.

use std::time::Duration;

use chrono::{DateTime, Local};

/// Interval between automatic fetch cycles.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(90);

/// How long the loading indicator lingers after a cycle settles.
pub const LOADING_GRACE: Duration = Duration::from_secs(2);

/// A collapsible section; the icon mirrors the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collapsible {
    collapsed: bool,
}

impl Collapsible {
    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn toggle(&mut self) {
        self.collapsed = !self.collapsed;
    }

    pub fn collapse(&mut self) {
        self.collapsed = true;
    }

    pub fn expand(&mut self) {
        self.collapsed = false;
    }

    pub fn icon(&self) -> char {
        if self.collapsed { '▼' } else { '▲' }
    }
}

/// State of the loading overlay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadingIndicator {
    #[default]
    Hidden,
    Loading,
    /// Settled; still visible until the grace period ends.
    Done,
    Failed(String),
}

impl LoadingIndicator {
    pub fn is_visible(&self) -> bool {
        !matches!(self, LoadingIndicator::Hidden)
    }

    pub fn text(&self) -> Option<String> {
        match self {
            LoadingIndicator::Hidden | LoadingIndicator::Done => None,
            LoadingIndicator::Loading => Some("loading...".to_string()),
            LoadingIndicator::Failed(msg) => Some(msg.clone()),
        }
    }
}

/// Everything around the map and the detail panel.
#[derive(Debug, Default)]
pub struct Chrome {
    pub info: Collapsible,
    pub servers: Collapsible,
    pub loading: LoadingIndicator,
    last_updated: Option<DateTime<Local>>,
}

impl Chrome {
    pub fn mark_updated(&mut self, at: DateTime<Local>) {
        self.last_updated = Some(at);
    }

    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.last_updated
    }

    /// Local time of day of the last successful fetch, or `--:--:--`.
    pub fn update_time(&self) -> String {
        self.last_updated
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string())
    }
}
