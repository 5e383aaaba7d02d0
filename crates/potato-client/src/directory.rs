//! Finding people and starting conversations with them.

use thiserror::Error;
use tracing::info;

use potato_shared::protocol::normalize_email;
use potato_shared::{Conversation, ConversationId, ConversationSummary, Profile, ValidationError};

use crate::backend::{BackendError, DirectoryBackend};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error("User not found. They need to register first.")]
    UnknownUser(String),

    #[error("Chat already exists")]
    AlreadyExists(ConversationId),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Look up a registered user by email address.
pub async fn find_user<D>(backend: &D, raw_email: &str) -> Result<Profile, DirectoryError>
where
    D: DirectoryBackend + ?Sized,
{
    let email = normalize_email(raw_email)?;
    let me = backend.current_user().await?;
    if me.email.eq_ignore_ascii_case(&email) {
        return Err(DirectoryError::SelfConversation);
    }
    backend
        .find_user_by_email(&email)
        .await?
        .ok_or(DirectoryError::UnknownUser(email))
}

/// Start a direct conversation with the user registered under `raw_email`.
///
/// When one already exists the error carries its id so the caller can open
/// it instead.
pub async fn start_conversation_with<D>(
    backend: &D,
    raw_email: &str,
) -> Result<Conversation, DirectoryError>
where
    D: DirectoryBackend + ?Sized,
{
    let user = find_user(backend, raw_email).await?;
    match backend.create_conversation(user.id).await {
        Ok(conversation) => {
            info!(conversation = %conversation.id, counterpart = %user.id, "Started conversation");
            Ok(conversation)
        }
        Err(BackendError::Conflict {
            conversation_id: Some(id),
            ..
        }) => Err(DirectoryError::AlreadyExists(id)),
        Err(e) => Err(e.into()),
    }
}

/// The user's conversations, most recently created first.
pub async fn conversations<D>(backend: &D) -> Result<Vec<ConversationSummary>, DirectoryError>
where
    D: DirectoryBackend + ?Sized,
{
    let mut list = backend.list_conversations().await?;
    list.sort_by(|a, b| b.conversation.created_at.cmp(&a.conversation.created_at));
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use potato_shared::UserId;

    fn backend() -> FakeBackend {
        let backend = FakeBackend::new(UserId::new());
        backend.add_me("me@example.com");
        backend
    }

    #[tokio::test]
    async fn starts_conversation_with_normalized_email() {
        let backend = backend();
        let friend = backend.add_profile("friend@example.com", Some("Friend"));

        let conversation = start_conversation_with(&backend, "  Friend@Example.COM ")
            .await
            .unwrap();
        assert!(conversation.participants.contains(&friend.id));

        let list = conversations(&backend).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].counterpart.id, friend.id);
    }

    #[tokio::test]
    async fn existing_conversation_is_reported_with_its_id() {
        let backend = backend();
        backend.add_profile("friend@example.com", None);
        let first = start_conversation_with(&backend, "friend@example.com")
            .await
            .unwrap();

        match start_conversation_with(&backend, "friend@example.com").await {
            Err(DirectoryError::AlreadyExists(id)) => assert_eq!(id, first.id),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_empty_own_and_unknown_emails() {
        let backend = backend();

        assert!(matches!(
            start_conversation_with(&backend, "   ").await,
            Err(DirectoryError::Invalid(ValidationError::EmptyEmail))
        ));
        assert!(matches!(
            start_conversation_with(&backend, "ME@example.com").await,
            Err(DirectoryError::SelfConversation)
        ));
        assert!(matches!(
            start_conversation_with(&backend, "ghost@example.com").await,
            Err(DirectoryError::UnknownUser(email)) if email == "ghost@example.com"
        ));
    }
}
