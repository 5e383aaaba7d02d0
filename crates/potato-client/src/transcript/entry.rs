use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use potato_shared::{ConversationId, Message, MessageId, UserId};

/// Key of a transcript entry.
///
/// Provisional keys come from a local counter and confirmed keys from the
/// backend, so the two can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryId {
    Provisional(u64),
    Confirmed(MessageId),
}

impl EntryId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, EntryId::Provisional(_))
    }

    pub fn confirmed(&self) -> Option<MessageId> {
        match self {
            EntryId::Confirmed(id) => Some(*id),
            EntryId::Provisional(_) => None,
        }
    }
}

impl From<MessageId> for EntryId {
    fn from(id: MessageId) -> Self {
        EntryId::Confirmed(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Provisional(n) => write!(f, "local-{n}"),
            EntryId::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Confirmed,
}

/// One row of the rendered transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub conversation_id: ConversationId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited: bool,
}

impl Entry {
    /// A locally composed message not yet acknowledged by the backend.
    pub fn provisional(
        seq: u64,
        conversation_id: ConversationId,
        author_id: UserId,
        body: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::Provisional(seq),
            conversation_id,
            author_id,
            body,
            created_at: now,
            updated_at: now,
            edited: false,
        }
    }

    /// Derived from the key: pending exactly while the id is provisional.
    pub fn delivery(&self) -> DeliveryState {
        if self.id.is_provisional() {
            DeliveryState::Pending
        } else {
            DeliveryState::Confirmed
        }
    }
}

impl From<Message> for Entry {
    fn from(m: Message) -> Self {
        Self {
            id: EntryId::Confirmed(m.id),
            conversation_id: m.conversation_id,
            author_id: m.author_id,
            body: m.body,
            created_at: m.created_at,
            updated_at: m.updated_at,
            edited: m.edited,
        }
    }
}

/// Fields a [`patch`](super::MessageStore::patch) or
/// [`replace_id`](super::MessageStore::replace_id) may change.  Identity,
/// conversation and author are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub edited: Option<bool>,
}

impl EntryPatch {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Every mutable field as the backend reports it.
    pub fn from_message(m: &Message) -> Self {
        Self {
            body: Some(m.body.clone()),
            created_at: Some(m.created_at),
            updated_at: Some(m.updated_at),
            edited: Some(m.edited),
        }
    }

    pub(crate) fn apply(self, entry: &mut Entry) {
        if let Some(body) = self.body {
            entry.body = body;
        }
        if let Some(created_at) = self.created_at {
            entry.created_at = created_at;
        }
        if let Some(updated_at) = self.updated_at {
            entry.updated_at = updated_at;
        }
        if let Some(edited) = self.edited {
            entry.edited = edited;
        }
    }
}
