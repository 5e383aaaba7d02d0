use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use potato_shared::protocol::ErrorBody;
use potato_shared::{ConversationId, ValidationError};
use potato_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not signed in")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        message: String,
        conversation_id: Option<ConversationId>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Not found".into()),
            StoreError::EmailTaken(email) => ServerError::Conflict {
                message: format!("Email already registered: {email}"),
                conversation_id: None,
            },
            StoreError::ConversationExists(id) => ServerError::Conflict {
                message: "Chat already exists".into(),
                conversation_id: Some(id),
            },
            StoreError::SelfConversation => ServerError::BadRequest(e.to_string()),
            StoreError::NotParticipant | StoreError::NotOwner => {
                ServerError::Forbidden(e.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let mut conversation_id = None;
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict {
                conversation_id: existing,
                ..
            } => {
                conversation_id = *existing;
                (StatusCode::CONFLICT, self.to_string())
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: message,
            conversation_id,
        };

        (status, axum::Json(body)).into_response()
    }
}
