//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a desktop shell can construct the core
//! without any environment at all.

use std::time::Duration;

use potato_shared::constants::{
    DEFAULT_AT_BOTTOM_SLACK_PX, DEFAULT_HTTP_PORT, DEFAULT_PAGE_SIZE,
    DEFAULT_SCROLL_TOP_THRESHOLD_PX, MAX_PAGE_SIZE,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the chat server.
    /// Env: `POTATO_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Messages per history page.
    /// Env: `POTATO_PAGE_SIZE` (1..=100)
    /// Default: `20`
    pub page_size: u32,

    /// Distance from the top of the transcript that triggers loading older
    /// history.
    /// Env: `POTATO_SCROLL_THRESHOLD_PX`
    /// Default: `100`
    pub scroll_threshold_px: f64,

    /// How close to the bottom still counts as "at the bottom" when a remote
    /// message arrives.
    pub at_bottom_slack_px: f64,

    /// Timeout applied to every HTTP request except the change feed.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            page_size: DEFAULT_PAGE_SIZE,
            scroll_threshold_px: DEFAULT_SCROLL_TOP_THRESHOLD_PX,
            at_bottom_slack_px: DEFAULT_AT_BOTTOM_SLACK_PX,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("POTATO_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.server_url = url.to_string();
            }
        }

        if let Ok(val) = std::env::var("POTATO_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid POTATO_PAGE_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("POTATO_SCROLL_THRESHOLD_PX") {
            match val.parse::<f64>() {
                Ok(px) if px.is_finite() && px >= 0.0 => config.scroll_threshold_px = px,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid POTATO_SCROLL_THRESHOLD_PX, using default"
                ),
            }
        }

        config
    }
}
