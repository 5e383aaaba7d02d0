//! In-memory backend for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

use potato_shared::{
    ChangeEvent, Conversation, ConversationId, ConversationSummary, Message, MessageId, Profile,
    UserId,
};

use crate::backend::{BackendError, ChatBackend, DirectoryBackend, Subscription};

#[derive(Default)]
struct FakeState {
    messages: Vec<Message>,
    feeds: Vec<(ConversationId, mpsc::Sender<ChangeEvent>)>,
    fail_sends: bool,
    gates: HashMap<ConversationId, Arc<Notify>>,
    last_ts: Option<DateTime<Utc>>,
    profiles: Vec<Profile>,
    conversations: Vec<Conversation>,
}

pub(crate) struct FakeBackend {
    me: UserId,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Strictly increasing timestamps, like a backend clock.
    fn now(state: &mut FakeState) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = state.last_ts {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        state.last_ts = Some(now);
        now
    }

    fn new_message(
        state: &mut FakeState,
        conversation_id: ConversationId,
        author_id: UserId,
        body: &str,
    ) -> Message {
        let now = Self::now(state);
        let message = Message {
            id: MessageId::new(),
            conversation_id,
            author_id,
            body: body.to_string(),
            created_at: now,
            updated_at: now,
            edited: false,
        };
        state.messages.push(message.clone());
        message
    }

    fn publish(state: &mut FakeState, event: ChangeEvent) {
        let conversation_id = event.conversation_id();
        state.feeds.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in state.feeds.iter().filter(|(c, _)| *c == conversation_id) {
            let _ = tx.try_send(event.clone());
        }
    }

    /// Store a message without publishing it.
    pub fn seed(&self, conversation_id: ConversationId, author_id: UserId, body: &str) -> Message {
        Self::new_message(&mut self.lock(), conversation_id, author_id, body)
    }

    /// Store a message and publish it, as if another client sent it.
    pub fn push_remote(
        &self,
        conversation_id: ConversationId,
        author_id: UserId,
        body: &str,
    ) -> Message {
        let mut state = self.lock();
        let message = Self::new_message(&mut state, conversation_id, author_id, body);
        Self::publish(
            &mut state,
            ChangeEvent::Insert {
                message: message.clone(),
            },
        );
        message
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Page fetches for `conversation_id` block until the returned gate is
    /// notified.
    pub fn hold_fetches(&self, conversation_id: ConversationId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gates.insert(conversation_id, gate.clone());
        gate
    }

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn live_subscribers(&self, conversation_id: ConversationId) -> usize {
        self.lock()
            .feeds
            .iter()
            .filter(|(c, tx)| *c == conversation_id && !tx.is_closed())
            .count()
    }

    pub async fn wait_for_subscriber(&self, conversation_id: ConversationId) {
        for _ in 0..400 {
            if self.live_subscribers(conversation_id) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no subscriber for {conversation_id}");
    }

    pub fn add_profile(&self, email: &str, full_name: Option<&str>) -> Profile {
        let profile = Profile {
            id: UserId::new(),
            email: email.to_string(),
            full_name: full_name.map(str::to_string),
            avatar_url: None,
            created_at: Utc::now(),
        };
        self.lock().profiles.push(profile.clone());
        profile
    }

    /// Register the signed-in user's own profile.
    pub fn add_me(&self, email: &str) -> Profile {
        let profile = Profile {
            id: self.me,
            email: email.to_string(),
            full_name: None,
            avatar_url: None,
            created_at: Utc::now(),
        };
        self.lock().profiles.push(profile.clone());
        profile
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    fn current_user_id(&self) -> UserId {
        self.me
    }

    async fn fetch_page(
        &self,
        conversation_id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError> {
        let gate = self.lock().gates.get(&conversation_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut page: Vec<Message> = self
            .messages(conversation_id)
            .into_iter()
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        author_id: UserId,
        body: String,
    ) -> Result<Message, BackendError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(BackendError::Network("connection refused".into()));
        }
        let message = Self::new_message(&mut state, conversation_id, author_id, &body);
        Self::publish(
            &mut state,
            ChangeEvent::Insert {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    async fn edit_message(&self, id: MessageId, body: String) -> Result<Message, BackendError> {
        let mut state = self.lock();
        let now = Self::now(&mut state);
        let me = self.me;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| BackendError::NotFound("Message not found".into()))?;
        if message.author_id != me {
            return Err(BackendError::Forbidden("Not your message".into()));
        }
        message.body = body;
        message.updated_at = now;
        message.edited = true;
        let message = message.clone();
        Self::publish(
            &mut state,
            ChangeEvent::Update {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), BackendError> {
        let mut state = self.lock();
        let Some(i) = state.messages.iter().position(|m| m.id == id) else {
            return Err(BackendError::NotFound("Message not found".into()));
        };
        if state.messages[i].author_id != self.me {
            return Err(BackendError::Forbidden("Not your message".into()));
        }
        let removed = state.messages.remove(i);
        Self::publish(
            &mut state,
            ChangeEvent::Delete {
                id,
                conversation_id: removed.conversation_id,
            },
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Subscription, BackendError> {
        let (tx, subscription) = Subscription::channel(conversation_id, 64);
        self.lock().feeds.push((conversation_id, tx));
        Ok(subscription)
    }
}

#[async_trait]
impl DirectoryBackend for FakeBackend {
    async fn current_user(&self) -> Result<Profile, BackendError> {
        self.lock()
            .profiles
            .iter()
            .find(|p| p.id == self.me)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>, BackendError> {
        Ok(self
            .lock()
            .profiles
            .iter()
            .find(|p| p.email == email)
            .cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        let state = self.lock();
        let summaries = state
            .conversations
            .iter()
            .filter_map(|c| {
                let other = c.counterpart_of(self.me)?;
                let counterpart = state.profiles.iter().find(|p| p.id == other)?.clone();
                Some(ConversationSummary {
                    conversation: c.clone(),
                    counterpart,
                })
            })
            .collect();
        Ok(summaries)
    }

    async fn create_conversation(
        &self,
        counterpart: UserId,
    ) -> Result<Conversation, BackendError> {
        let mut state = self.lock();
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.participants.contains(&counterpart))
        {
            return Err(BackendError::Conflict {
                message: "Chat already exists".into(),
                conversation_id: Some(existing.id),
            });
        }
        let conversation = Conversation {
            id: ConversationId::new(),
            created_by: self.me,
            participants: [self.me, counterpart],
            created_at: Utc::now(),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }
}
