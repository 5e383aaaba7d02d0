use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    routing::post,
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use potato_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use potato_shared::protocol::{
    normalize_email, validate_body, ConversationResponse, CreateConversationRequest,
    DeleteMessageRequest, EditMessageRequest, PageQuery, RegisterRequest, RegisterResponse,
    SendMessageRequest, SuccessResponse, UserResponse,
};
use potato_shared::{ChangeEvent, ConversationId, ConversationSummary, Message, Profile};
use potato_store::Database;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::feed::ChangeFeed;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub feed: ChangeFeed,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/users", post(register))
        .route("/api/users/me", get(current_user))
        .route("/api/users/search", get(search_user))
        .route("/api/chats", get(list_chats).post(create_chat))
        .route("/api/chats/events", get(chat_events))
        .route(
            "/api/messages",
            get(list_messages)
                .post(send_message)
                .put(edit_message)
                .delete(delete_message),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Authentication ───

/// The caller, resolved from `Authorization: Bearer <token>`.
pub struct AuthUser(pub Profile);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ServerError::Unauthorized)?;
        let db = state.db.lock().await;
        db.profile_for_token(token)?
            .map(AuthUser)
            .ok_or(ServerError::Unauthorized)
    }
}

// ─── Responses ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    registration_open: bool,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct EventsQuery {
    chat_id: ConversationId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        registration_open: state.config.registration_open,
    })
}

// ─── Users ───

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ServerError> {
    if !state.config.registration_open {
        return Err(ServerError::Forbidden(
            "Registration is closed on this instance".into(),
        ));
    }
    let email = normalize_email(&req.email)?;

    let db = state.db.lock().await;
    let user = db.create_profile(&email, req.full_name.as_deref())?;
    let token = db.create_session(user.id)?;

    info!(user = %user.id, "Registered new user");
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

async fn current_user(AuthUser(me): AuthUser) -> Json<UserResponse> {
    Json(UserResponse { user: me })
}

async fn search_user(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<UserResponse>, ServerError> {
    let raw = query.email.unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(ServerError::BadRequest("Email is required".into()));
    }
    let email = normalize_email(&raw)?;
    if email == me.email {
        return Err(ServerError::BadRequest(
            "Cannot search for your own email".into(),
        ));
    }

    let db = state.db.lock().await;
    db.find_profile_by_email(&email)?
        .map(|user| Json(UserResponse { user }))
        .ok_or_else(|| ServerError::NotFound("User not found. They need to register first.".into()))
}

// ─── Conversations ───

async fn list_chats(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(db.list_conversations_for(me.id)?))
}

async fn create_chat(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), ServerError> {
    let db = state.db.lock().await;
    let conversation = db.create_direct_conversation(me.id, req.counterpart_id)?;

    info!(conversation = %conversation.id, creator = %me.id, "Conversation created");
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse { conversation }),
    ))
}

async fn chat_events(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    state
        .db
        .lock()
        .await
        .ensure_participant(query.chat_id, me.id)?;

    info!(conversation = %query.chat_id, user = %me.id, "Change feed subscriber attached");
    Ok(Sse::new(state.feed.sse_stream(query.chat_id)).keep_alive(KeepAlive::default()))
}

// ─── Messages ───

async fn list_messages(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let db = state.db.lock().await;
    db.ensure_participant(query.chat_id, me.id)?;
    Ok(Json(db.get_messages_page(query.chat_id, query.before, limit)?))
}

async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    if req.author_id != me.id {
        return Err(ServerError::Forbidden(
            "Cannot send messages as another user".into(),
        ));
    }
    validate_body(&req.content)?;

    let message = state
        .db
        .lock()
        .await
        .insert_message(req.chat_id, me.id, &req.content)?;

    info!(msg_id = %message.id, conversation = %message.conversation_id, "Message stored");
    state.feed.publish(ChangeEvent::Insert {
        message: message.clone(),
    });
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    validate_body(&req.content)?;

    let message = state
        .db
        .lock()
        .await
        .update_message_body(req.id, me.id, &req.content)?;

    info!(msg_id = %message.id, "Message edited");
    state.feed.publish(ChangeEvent::Update {
        message: message.clone(),
    });
    Ok(Json(message))
}

async fn delete_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<DeleteMessageRequest>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let removed = state.db.lock().await.delete_message(req.id, me.id)?;

    info!(msg_id = %removed.id, "Message deleted");
    state.feed.publish(ChangeEvent::Delete {
        id: removed.id,
        conversation_id: removed.conversation_id,
    });
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Request};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(config: ServerConfig) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let state = AppState {
            db: Arc::new(Mutex::new(db)),
            feed: ChangeFeed::new(64),
            config: Arc::new(config),
        };
        (dir, state)
    }

    fn test_app() -> (TempDir, AppState, Router) {
        let (dir, state) = test_state(ServerConfig::default());
        let app = build_router(state.clone());
        (dir, state, app)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Register `email` and return `(token, user id)`.
    async fn signup(app: &Router, email: &str) -> (String, String) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/users",
            None,
            Some(json!({ "email": email })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Two users sharing a conversation: `(alice_token, alice_id, bob_token, chat_id)`.
    async fn pair(app: &Router) -> (String, String, String, String) {
        let (alice, alice_id) = signup(app, "alice@example.com").await;
        let (bob, bob_id) = signup(app, "bob@example.com").await;
        let (status, body) = call(
            app,
            Method::POST,
            "/api/chats",
            Some(&alice),
            Some(json!({ "counterpart_id": bob_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let chat = body["conversation"]["id"].as_str().unwrap().to_string();
        (alice, alice_id, bob, chat)
    }

    async fn send(app: &Router, token: &str, author: &str, chat: &str, content: &str) -> Value {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/messages",
            Some(token),
            Some(json!({ "chat_id": chat, "author_id": author, "content": content })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn health_check_responds() {
        let (_dir, _state, app) = test_app();
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn register_and_fetch_profile() {
        let (_dir, _state, app) = test_app();
        let (token, id) = signup(&app, "  Alice@Example.com ").await;

        let (status, body) = call(&app, Method::GET, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], id.as_str());
        assert_eq!(body["user"]["email"], "alice@example.com");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/users",
            None,
            Some(json!({ "email": "alice@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already registered"));
    }

    #[tokio::test]
    async fn closed_registration_is_forbidden() {
        let (_dir, state) = test_state(ServerConfig {
            registration_open: false,
            ..ServerConfig::default()
        });
        let app = build_router(state);
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/users",
            None,
            Some(json!({ "email": "a@b.c" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let (_dir, _state, app) = test_app();
        let (status, body) = call(&app, Method::GET, "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, Method::GET, "/api/chats", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn search_by_email() {
        let (_dir, _state, app) = test_app();
        let (alice, _) = signup(&app, "alice@example.com").await;
        let (_, bob_id) = signup(&app, "bob@example.com").await;

        let (status, _) = call(&app, Method::GET, "/api/users/search", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/users/search?email=ALICE%40example.com",
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("your own email"));

        let (status, _) = call(
            &app,
            Method::GET,
            "/api/users/search?email=ghost%40example.com",
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/users/search?email=bob%40example.com",
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], bob_id.as_str());
    }

    #[tokio::test]
    async fn duplicate_chat_reports_existing_id() {
        let (_dir, _state, app) = test_app();
        let (alice, alice_id, bob, chat) = pair(&app).await;

        // Bob trying to start the same conversation gets the existing one.
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/chats",
            Some(&bob),
            Some(json!({ "counterpart_id": alice_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["conversation_id"], chat.as_str());

        let (status, body) = call(&app, Method::GET, "/api/chats", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["counterpart"]["email"], "bob@example.com");
    }

    #[tokio::test]
    async fn messages_page_newest_first_with_cursor() {
        let (_dir, _state, app) = test_app();
        let (alice, alice_id, _bob, chat) = pair(&app).await;
        for i in 1..=25 {
            send(&app, &alice, &alice_id, &chat, &format!("m{i}")).await;
        }

        let (status, first) = call(
            &app,
            Method::GET,
            &format!("/api/messages?chat_id={chat}&limit=20"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let first = first.as_array().unwrap().clone();
        assert_eq!(first.len(), 20);
        assert_eq!(first[0]["body"], "m25");
        assert_eq!(first[19]["body"], "m6");

        let before = first[19]["created_at"].as_str().unwrap();
        let encoded = before.replace(':', "%3A").replace('+', "%2B");
        let (status, second) = call(
            &app,
            Method::GET,
            &format!("/api/messages?chat_id={chat}&limit=20&before={encoded}"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = second.as_array().unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second[0]["body"], "m5");
        assert_eq!(second[4]["body"], "m1");
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_write() {
        let (_dir, _state, app) = test_app();
        let (alice, _alice_id, _bob, chat) = pair(&app).await;
        let (carol, carol_id) = signup(&app, "carol@example.com").await;

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/messages?chat_id={chat}"),
            Some(&carol),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/messages",
            Some(&carol),
            Some(json!({ "chat_id": chat, "author_id": carol_id, "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Impersonation is refused even for participants.
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/messages",
            Some(&alice),
            Some(json!({ "chat_id": chat, "author_id": carol_id, "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/chats/events?chat_id={chat}"),
            Some(&carol),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (_dir, _state, app) = test_app();
        let (alice, alice_id, _bob, chat) = pair(&app).await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/messages",
            Some(&alice),
            Some(json!({ "chat_id": chat, "author_id": alice_id, "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn edit_and_delete_are_owner_only() {
        let (_dir, _state, app) = test_app();
        let (alice, alice_id, bob, chat) = pair(&app).await;
        let message = send(&app, &alice, &alice_id, &chat, "first draft").await;
        let id = message["id"].as_str().unwrap();

        let (status, _) = call(
            &app,
            Method::PUT,
            "/api/messages",
            Some(&bob),
            Some(json!({ "id": id, "content": "hijacked" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/messages",
            Some(&alice),
            Some(json!({ "id": id, "content": "final" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["body"], "final");
        assert_eq!(body["edited"], true);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/api/messages",
            Some(&bob),
            Some(json!({ "id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app,
            Method::DELETE,
            "/api/messages",
            Some(&alice),
            Some(json!({ "id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/api/messages",
            Some(&alice),
            Some(json!({ "id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let (_dir, state, app) = test_app();
        let (alice, alice_id, _bob, chat) = pair(&app).await;
        let mut rx = state.feed.subscribe();

        let message = send(&app, &alice, &alice_id, &chat, "hello").await;
        let id = message["id"].as_str().unwrap();
        call(
            &app,
            Method::DELETE,
            "/api/messages",
            Some(&alice),
            Some(json!({ "id": id })),
        )
        .await;

        match rx.recv().await.unwrap() {
            ChangeEvent::Insert { message } => assert_eq!(message.body, "hello"),
            other => panic!("expected insert, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ChangeEvent::Delete { id: deleted, .. } => assert_eq!(deleted.to_string(), id),
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn participants_can_open_event_stream() {
        let (_dir, _state, app) = test_app();
        let (_alice, _alice_id, bob, chat) = pair(&app).await;

        let req = Request::builder()
            .uri(format!("/api/chats/events?chat_id={chat}"))
            .header(AUTHORIZATION, format!("Bearer {bob}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );
    }
}
