//! Server-sent events framing for the change feed.

use potato_shared::constants::FEED_EVENT_NAME;
use potato_shared::ChangeEvent;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser.  Chunks may split lines (and UTF-8 sequences)
/// anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // comment / keep-alive
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` are not used by the change feed.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Decode a change-feed frame.  Frames of other event types yield `None`.
pub fn decode_change(frame: &SseFrame) -> Result<Option<ChangeEvent>, serde_json::Error> {
    match frame.event.as_deref() {
        None | Some(FEED_EVENT_NAME) => serde_json::from_str(&frame.data).map(Some),
        Some(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use potato_shared::{ConversationId, Message, MessageId, UserId};

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: change\nda").is_empty());
        assert!(decoder.push(b"ta: {\"a\":1}\r\n").is_empty());
        let frames = decoder.push(b"\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("change".into()),
                data: "{\"a\":1}".into(),
            }]
        );
    }

    #[test]
    fn comments_and_empty_events_are_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\nevent: ping\n\ndata: x\ndata: y\nid: 7\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x\ny");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn multibyte_character_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: pâte\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames[0].data, "pâte");
    }

    #[test]
    fn decodes_change_events_only() {
        let now = Utc::now();
        let event = ChangeEvent::Insert {
            message: Message {
                id: MessageId::new(),
                conversation_id: ConversationId::new(),
                author_id: UserId::new(),
                body: "hi".into(),
                created_at: now,
                updated_at: now,
                edited: false,
            },
        };
        let frame = SseFrame {
            event: Some(FEED_EVENT_NAME.into()),
            data: serde_json::to_string(&event).unwrap(),
        };
        assert_eq!(decode_change(&frame).unwrap(), Some(event));

        let other = SseFrame {
            event: Some("presence".into()),
            data: "{}".into(),
        };
        assert_eq!(decode_change(&other).unwrap(), None);

        let broken = SseFrame {
            event: None,
            data: "{".into(),
        };
        assert!(decode_change(&broken).is_err());
    }
}
