//! In-process change feed: every committed mutation is broadcast here and
//! fanned out to the SSE subscribers of its conversation.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use potato_shared::constants::FEED_EVENT_NAME;
use potato_shared::{ChangeEvent, ConversationId};

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a committed change.  Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let kind = event.kind();
        let conversation = event.conversation_id();
        match self.tx.send(event) {
            Ok(receivers) => debug!(kind, %conversation, receivers, "Change published"),
            Err(_) => debug!(kind, %conversation, "Change published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// SSE events for one conversation.  Ends when the feed is dropped.
    pub fn sse_stream(
        &self,
        conversation_id: ConversationId,
    ) -> impl Stream<Item = Result<Event, Infallible>> {
        stream::unfold(self.subscribe(), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.conversation_id() == conversation_id => {
                        match Event::default().event(FEED_EVENT_NAME).json_data(&event) {
                            Ok(frame) => return Some((Ok(frame), rx)),
                            Err(e) => warn!(error = %e, "Failed to encode change event"),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%conversation_id, skipped, "Change feed subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}
