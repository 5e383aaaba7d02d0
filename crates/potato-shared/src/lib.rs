//! # potato-shared
//!
//! Types shared by every layer of PotatoChat: identifier newtypes, the
//! domain models exchanged between client and server, the change-feed event
//! and the JSON request/response bodies of the HTTP API.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use models::{Conversation, ConversationSummary, Message, Profile};
pub use protocol::ChangeEvent;
pub use types::{ConversationId, MessageId, UserId};
