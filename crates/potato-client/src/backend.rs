//! The operations the core consumes from the hosted backend.
//!
//! Everything behind these traits (authentication, storage, authorization
//! policies, the push transport) is the backend's business.  The core is
//! constructed with an explicit handle implementing them, which is also how
//! tests substitute an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use potato_shared::{
    ChangeEvent, Conversation, ConversationId, ConversationSummary, Message, MessageId, Profile,
    UserId,
};

/// Failures reported by a backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Not signed in")]
    Unauthorized,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        /// Present when the conflict is an existing conversation.
        conversation_id: Option<ConversationId>,
    },

    #[error("Rejected: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Message operations scoped to the signed-in user.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Who "local" is when classifying messages.
    fn current_user_id(&self) -> UserId;

    /// Up to `limit` messages of the conversation, newest first, strictly
    /// older than `before` when it is set.
    async fn fetch_page(
        &self,
        conversation_id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        author_id: UserId,
        body: String,
    ) -> Result<Message, BackendError>;

    /// Returns the updated row with `edited` set.
    async fn edit_message(&self, id: MessageId, body: String) -> Result<Message, BackendError>;

    async fn delete_message(&self, id: MessageId) -> Result<(), BackendError>;

    /// Open the change feed of one conversation.  Reconnects after a dropped
    /// connection are the implementation's concern.
    async fn subscribe(&self, conversation_id: ConversationId)
        -> Result<Subscription, BackendError>;
}

/// User discovery and conversation management.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn current_user(&self) -> Result<Profile, BackendError>;

    /// `Ok(None)` when no user is registered under `email`.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>, BackendError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, BackendError>;

    async fn create_conversation(&self, counterpart: UserId)
        -> Result<Conversation, BackendError>;
}

/// A live change feed for one conversation.
///
/// Dropping the handle tears the feed down, including the task pumping
/// events into it.
#[derive(Debug)]
pub struct Subscription {
    conversation_id: ConversationId,
    events: mpsc::Receiver<ChangeEvent>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A subscription fed through the returned sender.
    pub fn channel(
        conversation_id: ConversationId,
        capacity: usize,
    ) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                conversation_id,
                events: rx,
                pump: None,
            },
        )
    }

    /// Attach the task that produces events; it is aborted on drop.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Next event, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
