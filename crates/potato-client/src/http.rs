//! [`ChatBackend`] and [`DirectoryBackend`] over the server's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use potato_shared::protocol::{
    ConversationResponse, CreateConversationRequest, DeleteMessageRequest, EditMessageRequest,
    ErrorBody, PageQuery, RegisterRequest, RegisterResponse, SendMessageRequest, SuccessResponse,
    UserResponse,
};
use potato_shared::{
    ChangeEvent, Conversation, ConversationId, ConversationSummary, Message, MessageId, Profile,
    UserId,
};

use crate::backend::{BackendError, ChatBackend, DirectoryBackend, Subscription};
use crate::config::ClientConfig;
use crate::feed::{decode_change, SseDecoder};

const FEED_RETRY_MIN: Duration = Duration::from_secs(1);
const FEED_RETRY_MAX: Duration = Duration::from_secs(30);

/// A signed-in connection to a chat server.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
    user: Profile,
}

impl HttpBackend {
    /// Register a new account and sign in with it.
    pub async fn register(
        config: &ClientConfig,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Self, BackendError> {
        let client = build_client()?;
        let request = RegisterRequest {
            email: email.to_string(),
            full_name: full_name.map(str::to_string),
        };
        let resp = client
            .post(format!("{}/api/users", config.server_url))
            .timeout(config.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let registered: RegisterResponse = decode(resp).await?;
        info!(user = %registered.user.id, "Registered new account");

        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            token: registered.token,
            timeout: config.request_timeout,
            user: registered.user,
        })
    }

    /// Sign in with an existing session token.
    pub async fn connect(
        config: &ClientConfig,
        token: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = build_client()?;
        let token = token.into();
        let resp = client
            .get(format!("{}/api/users/me", config.server_url))
            .timeout(config.request_timeout)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport)?;
        let me: UserResponse = decode(resp).await?;
        debug!(user = %me.user.id, "Session token accepted");

        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            token,
            timeout: config.request_timeout,
            user: me.user,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user(&self) -> &Profile {
        &self.user
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .bearer_auth(&self.token)
    }

    async fn open_feed(&self, conversation_id: ConversationId) -> Result<Response, BackendError> {
        open_feed(&self.client, &self.base_url, &self.token, conversation_id).await
    }
}

fn build_client() -> Result<reqwest::Client, BackendError> {
    // No client-wide timeout: it would also cut the long-lived feed stream.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| BackendError::Network(e.to_string()))
}

fn transport(e: reqwest::Error) -> BackendError {
    if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Map a non-2xx status and its `{ "error": ... }` body.
fn status_error(status: StatusCode, body: Option<ErrorBody>) -> BackendError {
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            BackendError::Validation(message)
        }
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized,
        StatusCode::FORBIDDEN => BackendError::Forbidden(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::CONFLICT => BackendError::Conflict {
            message,
            conversation_id: body.and_then(|b| b.conversation_id),
        },
        _ => BackendError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.json::<ErrorBody>().await.ok();
    Err(status_error(status, body))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    check(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

async fn open_feed(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    conversation_id: ConversationId,
) -> Result<Response, BackendError> {
    let resp = client
        .get(format!("{base_url}/api/chats/events"))
        .query(&[("chat_id", conversation_id.to_string())])
        .bearer_auth(token)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(transport)?;
    check(resp).await
}

/// Forward decoded events until the subscriber goes away, reconnecting with
/// backoff whenever the stream drops.
async fn pump_feed(
    backend: HttpBackend,
    conversation_id: ConversationId,
    first: Response,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let mut resp = Some(first);
    let mut retry = FEED_RETRY_MIN;

    loop {
        if let Some(stream) = resp.take() {
            retry = FEED_RETRY_MIN;
            if !forward(stream, &tx).await {
                return;
            }
            debug!(conversation = %conversation_id, "Change feed stream ended");
        }
        if tx.is_closed() {
            return;
        }

        tokio::time::sleep(retry).await;
        match backend.open_feed(conversation_id).await {
            Ok(stream) => {
                info!(conversation = %conversation_id, "Change feed reconnected");
                resp = Some(stream);
            }
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Change feed reconnect failed");
                retry = (retry * 2).min(FEED_RETRY_MAX);
            }
        }
    }
}

/// Returns `false` once the receiving side is gone.
async fn forward(resp: Response, tx: &mpsc::Sender<ChangeEvent>) -> bool {
    let mut stream = resp.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Change feed read failed");
                return true;
            }
        };
        for frame in decoder.push(&chunk) {
            match decode_change(&frame) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Malformed change event skipped"),
            }
        }
    }
    true
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn current_user_id(&self) -> UserId {
        self.user.id
    }

    async fn fetch_page(
        &self,
        conversation_id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError> {
        let query = PageQuery {
            chat_id: conversation_id,
            before,
            limit: Some(limit),
        };
        let resp = self
            .request(reqwest::Method::GET, "/api/messages")
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        author_id: UserId,
        body: String,
    ) -> Result<Message, BackendError> {
        let request = SendMessageRequest {
            chat_id: conversation_id,
            author_id,
            content: body,
        };
        let resp = self
            .request(reqwest::Method::POST, "/api/messages")
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn edit_message(&self, id: MessageId, body: String) -> Result<Message, BackendError> {
        let resp = self
            .request(reqwest::Method::PUT, "/api/messages")
            .json(&EditMessageRequest { id, content: body })
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), BackendError> {
        let resp = self
            .request(reqwest::Method::DELETE, "/api/messages")
            .json(&DeleteMessageRequest { id })
            .send()
            .await
            .map_err(transport)?;
        let done: SuccessResponse = decode(resp).await?;
        if done.success {
            Ok(())
        } else {
            Err(BackendError::Service {
                status: 200,
                message: "Delete was not applied".into(),
            })
        }
    }

    async fn subscribe(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Subscription, BackendError> {
        let first = self.open_feed(conversation_id).await?;
        let (tx, subscription) = Subscription::channel(conversation_id, 64);
        let pump = tokio::spawn(pump_feed(self.clone(), conversation_id, first, tx));
        debug!(conversation = %conversation_id, "Change feed opened");
        Ok(subscription.with_pump(pump))
    }
}

#[async_trait]
impl DirectoryBackend for HttpBackend {
    async fn current_user(&self) -> Result<Profile, BackendError> {
        let resp = self
            .request(reqwest::Method::GET, "/api/users/me")
            .send()
            .await
            .map_err(transport)?;
        let me: UserResponse = decode(resp).await?;
        Ok(me.user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>, BackendError> {
        let resp = self
            .request(reqwest::Method::GET, "/api/users/search")
            .query(&[("email", email)])
            .send()
            .await
            .map_err(transport)?;
        match decode::<UserResponse>(resp).await {
            Ok(found) => Ok(Some(found.user)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        let resp = self
            .request(reqwest::Method::GET, "/api/chats")
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }

    async fn create_conversation(
        &self,
        counterpart: UserId,
    ) -> Result<Conversation, BackendError> {
        let resp = self
            .request(reqwest::Method::POST, "/api/chats")
            .json(&CreateConversationRequest {
                counterpart_id: counterpart,
            })
            .send()
            .await
            .map_err(transport)?;
        let created: ConversationResponse = decode(resp).await?;
        Ok(created.conversation)
    }
}
