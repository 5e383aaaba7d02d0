//! The transcript controller.
//!
//! [`ChatController`] is a synchronous state machine.  User actions and
//! backend results go in; [`Effect`]s (backend calls to perform) and
//! [`ViewEvent`]s (what the view should do) come out.  It never awaits, so
//! every interleaving of responses and change events can be replayed
//! deterministically.  [`crate::session`] drives it against a real backend.
//!
//! Every effect carries a [`RequestTag`] naming the conversation and the
//! generation it was issued under.  Opening or closing a conversation bumps
//! the generation, and completions or change events carrying an older tag
//! are discarded.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use potato_shared::protocol::validate_body;
use potato_shared::{ChangeEvent, ConversationId, Message, MessageId, UserId, ValidationError};

use crate::backend::BackendError;
use crate::composer::{Composer, EditState};
use crate::config::ClientConfig;
use crate::events::{Operation, ViewEvent};
use crate::transcript::{DeliveryState, Entry, EntryId, EntryPatch, MessageStore, PageCursor};
use crate::viewport::{ScrollMetrics, Viewport};

/// Identifies the conversation generation a request was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestTag {
    pub conversation_id: ConversationId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// The most recent page, fetched when a conversation is opened.
    Initial,
    /// Older history, fetched when the user scrolls near the top.
    Older,
}

/// Progress of the initial history load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoadState {
    /// No conversation open.
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// A backend call the controller wants performed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Subscribe {
        tag: RequestTag,
    },
    FetchPage {
        tag: RequestTag,
        kind: PageKind,
        before: Option<DateTime<Utc>>,
        limit: u32,
    },
    Send {
        tag: RequestTag,
        provisional: EntryId,
        author_id: UserId,
        body: String,
    },
    Edit {
        tag: RequestTag,
        id: MessageId,
        body: String,
    },
    Delete {
        tag: RequestTag,
        id: MessageId,
    },
}

impl Effect {
    pub fn tag(&self) -> RequestTag {
        match self {
            Effect::Subscribe { tag }
            | Effect::FetchPage { tag, .. }
            | Effect::Send { tag, .. }
            | Effect::Edit { tag, .. }
            | Effect::Delete { tag, .. } => *tag,
        }
    }
}

/// The result of an [`Effect`], fed back through [`ChatController::apply`].
#[derive(Debug)]
pub enum Completion {
    PageLoaded {
        tag: RequestTag,
        kind: PageKind,
        result: Result<Vec<Message>, BackendError>,
    },
    Sent {
        tag: RequestTag,
        provisional: EntryId,
        result: Result<Message, BackendError>,
    },
    Edited {
        tag: RequestTag,
        id: MessageId,
        result: Result<Message, BackendError>,
    },
    Deleted {
        tag: RequestTag,
        id: MessageId,
        result: Result<(), BackendError>,
    },
}

impl Completion {
    pub fn tag(&self) -> RequestTag {
        match self {
            Completion::PageLoaded { tag, .. }
            | Completion::Sent { tag, .. }
            | Completion::Edited { tag, .. }
            | Completion::Deleted { tag, .. } => *tag,
        }
    }
}

/// A transcript row as the view renders it.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: Entry,
    pub delivery: DeliveryState,
    pub own: bool,
    pub deleting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditView {
    pub id: MessageId,
    pub draft: String,
    pub submitting: bool,
}

/// Everything the view needs to render the open conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub load_state: LoadState,
    pub entries: Vec<EntryView>,
    pub has_more: bool,
    pub loading_older: bool,
    pub input: String,
    pub sending: bool,
    pub editing: Option<EditView>,
}

pub struct ChatController {
    me: UserId,
    config: ClientConfig,
    active: Option<RequestTag>,
    generation: u64,
    store: MessageStore,
    cursor: PageCursor,
    load: LoadState,
    loading_older: bool,
    viewport: Viewport,
    composer: Composer,
    edit: Option<EditState>,
    deleting: HashSet<MessageId>,
    next_local_seq: u64,
    events: Vec<ViewEvent>,
}

impl ChatController {
    pub fn new(me: UserId, config: ClientConfig) -> Self {
        Self {
            me,
            config,
            active: None,
            generation: 0,
            store: MessageStore::new(),
            cursor: PageCursor::new(),
            load: LoadState::Idle,
            loading_older: false,
            viewport: Viewport::new(),
            composer: Composer::default(),
            edit: None,
            deleting: HashSet::new(),
            next_local_seq: 0,
            events: Vec::new(),
        }
    }

    // -- Accessors ---------------------------------------------------------

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active.map(|tag| tag.conversation_id)
    }

    pub fn active_tag(&self) -> Option<RequestTag> {
        self.active
    }

    /// Whether results issued under `tag` still apply.
    pub fn is_current(&self, tag: &RequestTag) -> bool {
        self.active.as_ref() == Some(tag)
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn edit_state(&self) -> Option<&EditState> {
        self.edit.as_ref()
    }

    pub fn is_deleting(&self, id: MessageId) -> bool {
        self.deleting.contains(&id)
    }

    /// View events produced since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        let entries = self
            .store
            .iter()
            .map(|entry| EntryView {
                delivery: entry.delivery(),
                own: entry.author_id == self.me,
                deleting: entry
                    .id
                    .confirmed()
                    .is_some_and(|id| self.deleting.contains(&id)),
                entry: entry.clone(),
            })
            .collect();

        TranscriptSnapshot {
            conversation_id: self.active_conversation(),
            load_state: self.load.clone(),
            entries,
            has_more: self.cursor.has_more(),
            loading_older: self.loading_older,
            input: self.composer.input().to_string(),
            sending: self.composer.is_submitting(),
            editing: self.edit.as_ref().map(|edit| EditView {
                id: edit.target(),
                draft: edit.draft().to_string(),
                submitting: edit.is_submitting(),
            }),
        }
    }

    // -- Conversation lifecycle --------------------------------------------

    /// Open a conversation, discarding all state of the previous one.
    ///
    /// Returns the subscription and first-page requests.
    pub fn open(&mut self, conversation_id: ConversationId) -> Vec<Effect> {
        self.reset();
        self.generation += 1;
        let tag = RequestTag {
            conversation_id,
            generation: self.generation,
        };
        self.active = Some(tag);
        self.load = LoadState::Loading;
        debug!(conversation = %conversation_id, generation = tag.generation, "Opening conversation");
        self.emit(ViewEvent::TranscriptChanged);

        vec![
            Effect::Subscribe { tag },
            Effect::FetchPage {
                tag,
                kind: PageKind::Initial,
                before: None,
                limit: self.config.page_size,
            },
        ]
    }

    pub fn close(&mut self) {
        if self.active.is_none() {
            return;
        }
        self.reset();
        self.generation += 1;
        self.emit(ViewEvent::TranscriptChanged);
    }

    fn reset(&mut self) {
        self.active = None;
        self.store.clear();
        self.cursor = PageCursor::new();
        self.load = LoadState::Idle;
        self.loading_older = false;
        self.viewport.reset();
        self.composer = Composer::default();
        self.edit = None;
        self.deleting.clear();
    }

    // -- Sending -----------------------------------------------------------

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.composer.set_input(text);
    }

    /// Send the composed text.
    ///
    /// The message appears immediately as a pending entry.  Empty input, a
    /// send already in flight, or no open conversation produce no request.
    pub fn submit(&mut self) -> Option<Effect> {
        let tag = self.active?;
        if self.composer.is_submitting() {
            debug!("Send already in flight, ignoring submit");
            return None;
        }
        let body = match validate_body(self.composer.input()) {
            Ok(body) => body.trim().to_string(),
            Err(ValidationError::EmptyBody) => return None,
            Err(e) => {
                self.emit(ViewEvent::Failure {
                    operation: Operation::Send,
                    reason: e.to_string(),
                });
                return None;
            }
        };

        self.next_local_seq += 1;
        let provisional = EntryId::Provisional(self.next_local_seq);
        self.composer.begin(provisional);
        self.store.insert_tail(Entry::provisional(
            self.next_local_seq,
            tag.conversation_id,
            self.me,
            body.clone(),
            Utc::now(),
        ));

        self.emit(ViewEvent::InputChanged {
            text: String::new(),
        });
        self.emit(ViewEvent::TranscriptChanged);
        self.emit(ViewEvent::ScrollToBottom);

        Some(Effect::Send {
            tag,
            provisional,
            author_id: self.me,
            body,
        })
    }

    fn on_sent(&mut self, provisional: EntryId, result: Result<Message, BackendError>) {
        if self.composer.in_flight() != Some(provisional) {
            debug!(id = %provisional, "Send result for unknown entry ignored");
            return;
        }

        match result {
            Ok(message) => {
                self.composer.settle();
                let confirmed = EntryId::Confirmed(message.id);
                if self.store.contains(&confirmed) {
                    // The change feed already promoted or inserted it.
                    self.store.remove(&provisional);
                } else if !self.store.replace_id(
                    &provisional,
                    confirmed,
                    EntryPatch::from_message(&message),
                ) {
                    self.store.insert_tail(Entry::from(message));
                }
                self.emit(ViewEvent::TranscriptChanged);
            }
            Err(e) => {
                warn!(error = %e, "Failed to send message");
                self.store.remove(&provisional);
                if let Some(text) = self.composer.restore() {
                    self.emit(ViewEvent::InputChanged { text });
                }
                self.emit(ViewEvent::TranscriptChanged);
                self.emit(ViewEvent::Failure {
                    operation: Operation::Send,
                    reason: e.to_string(),
                });
            }
        }
    }

    // -- Editing -----------------------------------------------------------

    /// Start editing one of the user's own confirmed messages.
    pub fn begin_edit(&mut self, id: MessageId) -> bool {
        if self.edit.as_ref().is_some_and(EditState::is_submitting) {
            debug!("Edit already in flight");
            return false;
        }
        let Some(entry) = self.store.get(&EntryId::Confirmed(id)) else {
            return false;
        };
        if entry.author_id != self.me {
            debug!(%id, "Refusing to edit another user's message");
            return false;
        }

        let draft = entry.body.clone();
        self.edit = Some(EditState::Editing {
            target: id,
            draft: draft.clone(),
        });
        self.emit(ViewEvent::EditStarted { id, draft });
        true
    }

    pub fn set_edit_draft(&mut self, text: impl Into<String>) {
        if let Some(EditState::Editing { draft, .. }) = &mut self.edit {
            *draft = text.into();
        }
    }

    pub fn cancel_edit(&mut self) {
        if let Some(EditState::Editing { target, .. }) = &self.edit {
            let id = *target;
            self.edit = None;
            self.emit(ViewEvent::EditFinished { id });
        }
    }

    /// Submit the edit draft.  An empty draft is refused locally and an
    /// unchanged one finishes the edit without a request.
    pub fn submit_edit(&mut self) -> Option<Effect> {
        let tag = self.active?;
        let Some(EditState::Editing { target, draft }) = &self.edit else {
            return None;
        };
        let (target, draft) = (*target, draft.clone());

        let body = match validate_body(&draft) {
            Ok(body) => body.trim().to_string(),
            Err(ValidationError::EmptyBody) => return None,
            Err(e) => {
                self.emit(ViewEvent::Failure {
                    operation: Operation::Edit,
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let unchanged = self
            .store
            .get(&EntryId::Confirmed(target))
            .map(|entry| entry.body == body);
        match unchanged {
            // Deleted while being edited.
            None | Some(true) => {
                self.edit = None;
                self.emit(ViewEvent::EditFinished { id: target });
                None
            }
            Some(false) => {
                self.edit = Some(EditState::Submitting { target, draft });
                Some(Effect::Edit {
                    tag,
                    id: target,
                    body,
                })
            }
        }
    }

    fn on_edited(&mut self, id: MessageId, result: Result<Message, BackendError>) {
        let draft = match &self.edit {
            Some(EditState::Submitting { target, draft }) if *target == id => draft.clone(),
            _ => {
                debug!(%id, "Edit result without matching edit ignored");
                return;
            }
        };

        match result {
            Ok(message) => {
                self.edit = None;
                let fields = EntryPatch {
                    edited: Some(true),
                    ..EntryPatch::from_message(&message)
                };
                self.store.patch(&EntryId::Confirmed(id), fields);
                self.emit(ViewEvent::TranscriptChanged);
                self.emit(ViewEvent::EditFinished { id });
            }
            Err(e) => {
                warn!(error = %e, %id, "Failed to edit message");
                self.edit = Some(EditState::Editing { target: id, draft });
                self.emit(ViewEvent::Failure {
                    operation: Operation::Edit,
                    reason: e.to_string(),
                });
            }
        }
    }

    // -- Deleting ----------------------------------------------------------

    /// Delete one of the user's own confirmed messages.  Pending entries have
    /// no backend id and cannot be addressed here.
    pub fn delete(&mut self, id: MessageId) -> Option<Effect> {
        let tag = self.active?;
        let entry = self.store.get(&EntryId::Confirmed(id))?;
        if entry.author_id != self.me {
            debug!(%id, "Refusing to delete another user's message");
            return None;
        }
        if !self.deleting.insert(id) {
            debug!(%id, "Delete already in flight");
            return None;
        }
        self.emit(ViewEvent::TranscriptChanged);
        Some(Effect::Delete { tag, id })
    }

    fn on_deleted(&mut self, id: MessageId, result: Result<(), BackendError>) {
        if !self.deleting.remove(&id) {
            return;
        }
        match result {
            Ok(()) => {
                self.store.remove(&EntryId::Confirmed(id));
                self.drop_edit_of(id);
            }
            Err(e) => {
                warn!(error = %e, %id, "Failed to delete message");
                self.emit(ViewEvent::Failure {
                    operation: Operation::Delete,
                    reason: e.to_string(),
                });
            }
        }
        self.emit(ViewEvent::TranscriptChanged);
    }

    fn drop_edit_of(&mut self, id: MessageId) {
        if matches!(&self.edit, Some(EditState::Editing { target, .. }) if *target == id) {
            self.edit = None;
            self.emit(ViewEvent::EditFinished { id });
        }
    }

    // -- Scrolling and pagination ------------------------------------------

    /// Record new scroll metrics.  Returns a request for older history when
    /// the user is near the top and no such request is in flight.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> Option<Effect> {
        self.viewport.update(metrics);
        let tag = self.active?;

        if self.load != LoadState::Ready
            || !self.cursor.has_more()
            || self.loading_older
            || !self.viewport.near_top(self.config.scroll_threshold_px)
        {
            return None;
        }

        self.loading_older = true;
        self.viewport.record_anchor();
        self.emit(ViewEvent::TranscriptChanged);
        Some(Effect::FetchPage {
            tag,
            kind: PageKind::Older,
            before: self.cursor.next_before(),
            limit: self.config.page_size,
        })
    }

    /// Called by the view once prepended history has been laid out.  Returns
    /// the scroll offset that keeps the previously visible message in place.
    pub fn restore_scroll_anchor(&mut self, new_scroll_height: f64) -> f64 {
        let offset = self.viewport.anchor_after_prepend(new_scroll_height);
        self.emit(ViewEvent::ScrollTo { offset });
        offset
    }

    fn on_page_loaded(&mut self, kind: PageKind, result: Result<Vec<Message>, BackendError>) {
        match kind {
            PageKind::Initial => self.on_first_page(result),
            PageKind::Older => self.on_older_page(result),
        }
    }

    fn on_first_page(&mut self, result: Result<Vec<Message>, BackendError>) {
        if self.load != LoadState::Loading {
            debug!("Duplicate first page ignored");
            return;
        }
        match result {
            Ok(batch) => {
                let fetched = batch.len();
                let oldest = batch.iter().map(|m| m.created_at).min();
                self.store
                    .insert_head_batch(batch.into_iter().map(Entry::from));
                self.cursor = PageCursor::from_first_page(oldest, fetched, self.config.page_size);
                self.load = LoadState::Ready;
                debug!(fetched, has_more = self.cursor.has_more(), "Loaded first page");
                self.emit(ViewEvent::TranscriptChanged);
                self.emit(ViewEvent::ScrollToBottom);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load messages");
                // Nothing loaded during `Loading` survives a failed open.
                self.store.clear();
                self.composer.settle();
                if let Some(edit) = self.edit.take() {
                    self.emit(ViewEvent::EditFinished { id: edit.target() });
                }
                self.deleting.clear();
                self.load = LoadState::Failed(e.to_string());
                self.emit(ViewEvent::TranscriptChanged);
                self.emit(ViewEvent::Failure {
                    operation: Operation::LoadHistory,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_older_page(&mut self, result: Result<Vec<Message>, BackendError>) {
        if !self.loading_older {
            debug!("Older page without pending request ignored");
            return;
        }
        self.loading_older = false;

        match result {
            Ok(batch) => {
                let fetched = batch.len();
                let oldest = batch.iter().map(|m| m.created_at).min();
                let added = self
                    .store
                    .insert_head_batch(batch.into_iter().map(Entry::from));
                self.cursor.advance(oldest, fetched, self.config.page_size);
                debug!(fetched, added, has_more = self.cursor.has_more(), "Loaded older page");

                self.emit(ViewEvent::TranscriptChanged);
                match self.viewport.pending_anchor() {
                    Some(previous_scroll_height) if added > 0 => {
                        self.emit(ViewEvent::RestoreScrollAnchor {
                            previous_scroll_height,
                        });
                    }
                    _ => self.viewport.clear_anchor(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to load older messages");
                self.viewport.clear_anchor();
                self.emit(ViewEvent::TranscriptChanged);
                self.emit(ViewEvent::Failure {
                    operation: Operation::LoadOlder,
                    reason: e.to_string(),
                });
            }
        }
    }

    // -- Backend input -----------------------------------------------------

    /// Feed back the result of an [`Effect`].  Results of an earlier
    /// generation are dropped.
    pub fn apply(&mut self, completion: Completion) {
        let tag = completion.tag();
        if !self.is_current(&tag) {
            debug!(
                conversation = %tag.conversation_id,
                generation = tag.generation,
                "Discarding stale completion"
            );
            return;
        }

        match completion {
            Completion::PageLoaded { kind, result, .. } => self.on_page_loaded(kind, result),
            Completion::Sent {
                provisional,
                result,
                ..
            } => self.on_sent(provisional, result),
            Completion::Edited { id, result, .. } => self.on_edited(id, result),
            Completion::Deleted { id, result, .. } => self.on_deleted(id, result),
        }
    }

    /// Apply one change-feed event received under `tag`.
    pub fn on_change(&mut self, tag: RequestTag, event: ChangeEvent) {
        if !self.is_current(&tag) || event.conversation_id() != tag.conversation_id {
            debug!(kind = event.kind(), "Discarding change for inactive conversation");
            return;
        }

        match event {
            ChangeEvent::Insert { message } => self.on_remote_insert(message),
            ChangeEvent::Update { message } => {
                if self
                    .store
                    .patch(&EntryId::Confirmed(message.id), EntryPatch::from_message(&message))
                {
                    self.emit(ViewEvent::TranscriptChanged);
                }
            }
            ChangeEvent::Delete { id, .. } => {
                if self.store.remove(&EntryId::Confirmed(id)).is_some() {
                    self.drop_edit_of(id);
                    self.emit(ViewEvent::TranscriptChanged);
                }
            }
        }
    }

    fn on_remote_insert(&mut self, message: Message) {
        let confirmed = EntryId::Confirmed(message.id);
        if self.store.contains(&confirmed) {
            debug!(id = %message.id, "Insert for known message ignored");
            return;
        }

        let local = message.author_id == self.me;
        if local {
            if let Some(provisional) = self.pending_match(&message) {
                // The feed beat the send response: promote in place.  The
                // response will then find the id already present.
                if self.store.replace_id(
                    &provisional,
                    confirmed,
                    EntryPatch::from_message(&message),
                ) {
                    self.emit(ViewEvent::TranscriptChanged);
                    return;
                }
            }
        }

        let follow = local || self.viewport.at_bottom(self.config.at_bottom_slack_px);
        self.store.insert_tail(Entry::from(message));
        self.emit(ViewEvent::TranscriptChanged);
        if follow {
            self.emit(ViewEvent::ScrollToBottom);
        }
    }

    /// The in-flight provisional entry, if `message` is its echo.
    fn pending_match(&self, message: &Message) -> Option<EntryId> {
        let provisional = self.composer.in_flight()?;
        self.store
            .get(&provisional)
            .filter(|entry| entry.body == message.body)
            .map(|entry| entry.id)
    }

    fn emit(&mut self, event: ViewEvent) {
        self.events.push(event);
    }
}
