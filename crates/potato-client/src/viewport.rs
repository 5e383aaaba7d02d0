//! Scroll geometry reported by the view.
//!
//! The controller never measures layout itself; the view reports metrics
//! after every scroll and after every render, and applies the offsets the
//! controller asks for.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    /// Offset of the visible area from the top of the content.
    pub scroll_top: f64,
    /// Total content height.
    pub scroll_height: f64,
    /// Height of the visible area.
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Viewport {
    metrics: ScrollMetrics,
    /// Content height recorded when a backward fetch was triggered.
    anchor_height: Option<f64>,
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> ScrollMetrics {
        self.metrics
    }

    pub fn update(&mut self, metrics: ScrollMetrics) {
        self.metrics = metrics;
    }

    pub fn near_top(&self, threshold_px: f64) -> bool {
        self.metrics.scroll_top < threshold_px
    }

    /// Before the first report there is no layout; treat that as "at the
    /// bottom" so the first incoming message still scrolls into view.
    pub fn at_bottom(&self, slack_px: f64) -> bool {
        self.metrics.scroll_height <= 0.0 || self.metrics.distance_from_bottom() <= slack_px
    }

    /// Remember the content height right before older history is prepended.
    pub fn record_anchor(&mut self) -> f64 {
        let height = self.metrics.scroll_height;
        self.anchor_height = Some(height);
        height
    }

    pub fn pending_anchor(&self) -> Option<f64> {
        self.anchor_height
    }

    pub fn clear_anchor(&mut self) {
        self.anchor_height = None;
    }

    /// Offset that keeps the previously visible message fixed once the
    /// prepended content has been laid out at `new_scroll_height`.
    pub fn anchor_after_prepend(&mut self, new_scroll_height: f64) -> f64 {
        let previous = self.anchor_height.take().unwrap_or(new_scroll_height);
        let restored = (self.metrics.scroll_top + (new_scroll_height - previous)).max(0.0);
        self.metrics.scroll_height = new_scroll_height;
        self.metrics.scroll_top = restored;
        restored
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
