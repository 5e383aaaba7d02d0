//! Input-side state: the message being composed and the message being
//! edited.

use potato_shared::MessageId;

use crate::transcript::EntryId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    Composing,
    /// A send is in flight.  `composed` is the text as typed, restored into
    /// the input if the send fails.
    Submitting { provisional: EntryId, composed: String },
}

#[derive(Debug, Clone)]
pub struct Composer {
    input: String,
    state: SendState,
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            input: String::new(),
            state: SendState::Composing,
        }
    }
}

impl Composer {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, SendState::Submitting { .. })
    }

    /// The provisional entry of the in-flight send, if any.
    pub fn in_flight(&self) -> Option<EntryId> {
        match &self.state {
            SendState::Submitting { provisional, .. } => Some(*provisional),
            SendState::Composing => None,
        }
    }

    /// Move to `Submitting`, clearing the input.  Returns the text as typed.
    pub(crate) fn begin(&mut self, provisional: EntryId) -> String {
        let composed = std::mem::take(&mut self.input);
        self.state = SendState::Submitting {
            provisional,
            composed: composed.clone(),
        };
        composed
    }

    /// Back to `Composing` after a successful send.
    pub(crate) fn settle(&mut self) {
        self.state = SendState::Composing;
    }

    /// Back to `Composing` after a failed send, with the composed text put
    /// back into the input ahead of anything typed since.  Returns the new
    /// input.
    pub(crate) fn restore(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, SendState::Composing) {
            SendState::Submitting { composed, .. } => {
                self.input = if self.input.trim().is_empty() {
                    composed
                } else {
                    format!("{composed}\n{}", self.input)
                };
                Some(self.input.clone())
            }
            SendState::Composing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState {
    Editing { target: MessageId, draft: String },
    /// Request in flight; `draft` is kept so a failure can hand it back.
    Submitting { target: MessageId, draft: String },
}

impl EditState {
    pub fn target(&self) -> MessageId {
        match self {
            EditState::Editing { target, .. } | EditState::Submitting { target, .. } => *target,
        }
    }

    pub fn draft(&self) -> &str {
        match self {
            EditState::Editing { draft, .. } | EditState::Submitting { draft, .. } => draft,
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, EditState::Submitting { .. })
    }
}
