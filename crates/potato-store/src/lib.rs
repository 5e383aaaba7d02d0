//! # potato-store
//!
//! SQLite persistence behind the PotatoChat reference backend.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for profiles, sessions,
//! conversations and messages.  Authorization rules that a hosted backend
//! would enforce with row-level policies (participant-only reads,
//! owner-only edits) are checked here, next to the queries.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod profiles;
pub mod sessions;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use potato_shared::models;
pub use models::*;
