/// Application name
pub const APP_NAME: &str = "PotatoChat";

/// Messages requested per transcript page
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound the server accepts for a single page request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Maximum message body length in characters
pub const MAX_MESSAGE_CHARS: usize = 4_000;

/// Distance from the top of the transcript (px) that triggers loading older history
pub const DEFAULT_SCROLL_TOP_THRESHOLD_PX: f64 = 100.0;

/// Distance from the bottom (px) still treated as "at the bottom"
pub const DEFAULT_AT_BOTTOM_SLACK_PX: f64 = 16.0;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Capacity of the server's in-process change-feed broadcast channel
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// SSE event name used for change-feed frames
pub const FEED_EVENT_NAME: &str = "change";
