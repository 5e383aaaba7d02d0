//! Wire types: the change-feed event and the JSON bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_CHARS;
use crate::error::ValidationError;
use crate::models::{Conversation, Message, Profile};
use crate::types::{ConversationId, MessageId, UserId};

/// A row-level change pushed to subscribers of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { message: Message },
    Update { message: Message },
    Delete {
        id: MessageId,
        conversation_id: ConversationId,
    },
}

impl ChangeEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ChangeEvent::Insert { message } | ChangeEvent::Update { message } => {
                message.conversation_id
            }
            ChangeEvent::Delete {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub counterpart_id: UserId,
}

/// Query string of `GET /api/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageQuery {
    pub chat_id: ConversationId,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: ConversationId,
    pub author_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub id: MessageId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    pub id: MessageId,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: Profile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Set on 409 when a conversation with the requested user already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a composed message body.  Whitespace-only bodies are empty.
pub fn validate_body(body: &str) -> Result<&str, ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    let len = body.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::BodyTooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(body)
}

/// Trim and lowercase an email address, rejecting obviously malformed input.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ValidationError::EmptyEmail);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ValidationError::InvalidEmail(email)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        let now = Utc::now();
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            author_id: UserId::new(),
            body: "hi".into(),
            created_at: now,
            updated_at: now,
            edited: false,
        }
    }

    #[test]
    fn change_event_is_internally_tagged() {
        let event = ChangeEvent::Insert { message: message() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "insert");
        assert_eq!(value["message"]["body"], "hi");
    }

    #[test]
    fn delete_event_carries_conversation() {
        let conversation_id = ConversationId::new();
        let event = ChangeEvent::Delete {
            id: MessageId::new(),
            conversation_id,
        };
        assert_eq!(event.conversation_id(), conversation_id);
        assert_eq!(event.kind(), "delete");
    }

    #[test]
    fn whitespace_body_is_empty() {
        assert_eq!(validate_body("  \n\t"), Err(ValidationError::EmptyBody));
        assert_eq!(validate_body(" hi "), Ok(" hi "));
    }

    #[test]
    fn overlong_body_rejected() {
        let body = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            validate_body(&body),
            Err(ValidationError::BodyTooLong { .. })
        ));
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert_eq!(normalize_email(" "), Err(ValidationError::EmptyEmail));
        assert!(matches!(
            normalize_email("nobody"),
            Err(ValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn error_body_omits_missing_conversation() {
        let body = ErrorBody {
            error: "nope".into(),
            conversation_id: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"error":"nope"}"#);
    }
}
