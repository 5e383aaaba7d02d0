//! # potato-client
//!
//! Client core of PotatoChat: the transcript of one open conversation, kept
//! consistent under optimistic sends, live change events and backward
//! pagination.
//!
//! - [`transcript`]: ordered message store and pagination cursor
//! - [`controller`]: the synchronous state machine driving them
//! - [`session`]: async driver running the controller against a backend
//! - [`backend`]: the operations consumed from the hosted backend, with an
//!   HTTP implementation in [`http`]

pub mod backend;
pub mod composer;
pub mod config;
pub mod controller;
pub mod directory;
pub mod events;
pub mod feed;
pub mod http;
pub mod session;
pub mod transcript;
pub mod viewport;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendError, ChatBackend, DirectoryBackend, Subscription};
pub use config::ClientConfig;
pub use controller::{ChatController, Completion, Effect, LoadState, RequestTag, TranscriptSnapshot};
pub use events::{Operation, ViewEvent};
pub use http::HttpBackend;
pub use session::{spawn_session, SessionCommand, SessionHandle};
