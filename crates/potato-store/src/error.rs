use potato_shared::ConversationId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Another profile already uses this email.
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// The two users already share a conversation.
    #[error("Conversation already exists: {0}")]
    ConversationExists(ConversationId),

    /// A user tried to open a conversation with themselves.
    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    /// The caller does not take part in the conversation.
    #[error("Not a participant of this conversation")]
    NotParticipant,

    /// The caller tried to modify a message written by someone else.
    #[error("Message belongs to another user")]
    NotOwner,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
