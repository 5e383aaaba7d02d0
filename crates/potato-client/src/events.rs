use serde::Serialize;

use potato_shared::MessageId;

/// Which user-visible operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    LoadHistory,
    LoadOlder,
    Send,
    Edit,
    Delete,
}

/// What the view should do after the controller changed state.
///
/// Serialized with kebab-case event names so a webview bridge can forward
/// them unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ViewEvent {
    /// The transcript, cursor or load state changed; re-render.
    TranscriptChanged,
    ScrollToBottom,
    /// Older history was prepended.  Once laid out, report the new content
    /// height so the previously visible message can be kept in place.
    RestoreScrollAnchor { previous_scroll_height: f64 },
    /// Absolute offset to apply.
    ScrollTo { offset: f64 },
    /// The composer's text was cleared or restored.
    InputChanged { text: String },
    EditStarted { id: MessageId, draft: String },
    EditFinished { id: MessageId },
    /// Non-fatal inline failure.
    Failure { operation: Operation, reason: String },
}
