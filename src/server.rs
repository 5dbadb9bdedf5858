//! # HTTP server
//!
//! JSON API over the assistant, the conversation store and the schema snapshot.
//!
//! | Route                                   | Purpose                                   |
//! |-----------------------------------------|-------------------------------------------|
//! | `POST /api/chat?conversationId=N`       | run one turn for the last posted message  |
//! | `GET /api/conversations`                | list conversations                        |
//! | `POST /api/conversations`               | create a conversation                     |
//! | `PATCH /api/conversations/{id}`         | rename                                    |
//! | `DELETE /api/conversations/{id}`        | delete with messages and queries          |
//! | `GET /api/conversations/{id}/messages`  | messages with their executed queries      |
//! | `GET /api/schema`                       | snapshot, discovering it when empty       |
//! | `POST /api/schema/discover`             | rediscover the live schema                |
//! | `POST /api/schema/descriptions`         | generate column descriptions              |
//! | `GET /api/suggestions`                  | questions to start a conversation with    |
//!
//! Client errors carry their message. Everything else is logged in full and
//! answered with a generic message so SQL, paths and credentials stay on the
//! server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    assistant::Assistant,
    config::DbaiConfig,
    conversations::ConversationStore,
    descriptions::DescriptionGenerator,
    discovery::SchemaDiscovery,
    error::DbaiError,
    llm::LanguageModel,
    models::{Conversation, MessageWithQueries},
    snapshot::{SnapshotStore, TableRow},
    source::SourceDatabase,
    suggestions::SuggestionGenerator,
    template::ChatTemplate,
    tools::QueryRecord,
};

const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// State shared by every handler.
pub struct AppState {
    pub store: ConversationStore,
    pub discovery: Arc<SchemaDiscovery>,
    pub assistant: Assistant,
    pub descriptions: DescriptionGenerator,
    pub suggestions: SuggestionGenerator,
    pub turn_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: ConversationStore,
        model: Arc<dyn LanguageModel>,
        source: Arc<dyn SourceDatabase>,
        snapshot: SnapshotStore,
        template: ChatTemplate,
        config: &DbaiConfig,
    ) -> Self {
        let discovery = Arc::new(SchemaDiscovery::new(source.clone(), snapshot));
        let assistant = Assistant::new(
            model.clone(),
            discovery.clone(),
            source,
            Arc::new(store.clone()),
            template,
        )
        .with_max_tool_rounds(config.max_tool_rounds);

        Self {
            store,
            descriptions: DescriptionGenerator::new(model.clone(), discovery.clone()),
            suggestions: SuggestionGenerator::new(model, discovery.clone()),
            discovery,
            assistant,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Dbai(#[from] DbaiError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Dbai(DbaiError::NotFound(m)) => {
                (StatusCode::NOT_FOUND, format!("{m} not found"))
            }
            ServerError::Dbai(DbaiError::TurnTimedOut(secs)) => {
                warn!(timeout_secs = secs, "turn timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "The assistant took too long to answer.".to_owned(),
                )
            }
            ServerError::Dbai(e) => {
                error!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong while answering. Please try again.".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            patch(rename_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/{id}/messages", get(conversation_messages))
        .route("/api/schema", get(schema))
        .route("/api/schema/discover", post(discover_schema))
        .route("/api/schema/descriptions", post(describe_schema))
        .route("/api/suggestions", get(suggestions))
        .with_state(state)
}

/// Bind `address` and serve until CTRL+C or SIGTERM.
pub async fn serve(state: Arc<AppState>, address: &str) -> crate::error::Result<()> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| DbaiError::Configuration(format!("invalid bind_address {address:?}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}

// ── Chat ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatParams {
    conversation_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    reply: String,
    message_id: Option<i32>,
    queries: Vec<QueryRecord>,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChatParams>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ServerError> {
    let conversation_id = params
        .conversation_id
        .ok_or_else(|| ServerError::BadRequest("conversationId is required".to_owned()))?;

    state.store.get_conversation(conversation_id)?;
    let history: Vec<_> = state
        .store
        .conversation_messages(conversation_id)?
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    let user_text = request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default();

    let outcome = state
        .assistant
        .run_turn_with_timeout(state.turn_timeout, conversation_id, user_text, &history)
        .await?;

    Ok(Json(ChatResponse {
        message_id: outcome.message.map(|m| m.id),
        reply: outcome.reply,
        queries: outcome.queries,
    }))
}

// ── Conversations ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameConversationRequest {
    title: String,
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Conversation>>, ServerError> {
    Ok(Json(state.store.list_conversations()?))
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, ServerError> {
    let title = request
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_owned());
    Ok(Json(state.store.create_conversation(&title)?))
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(request): Json<RenameConversationRequest>,
) -> Result<Json<Conversation>, ServerError> {
    if request.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".to_owned()));
    }
    Ok(Json(state.store.rename_conversation(id, &request.title)?))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.store.delete_conversation(id)?;
    Ok(Json(json!({ "deleted": true })))
}

async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<MessageWithQueries>>, ServerError> {
    state.store.get_conversation(id)?;
    Ok(Json(state.store.conversation_messages(id)?))
}

// ── Schema ───────────────────────────────────────────────────────────────────

async fn schema(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TableRow>>, ServerError> {
    Ok(Json(state.discovery.snapshot_or_discover().await?))
}

async fn discover_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TableRow>>, ServerError> {
    Ok(Json(state.discovery.discover().await?))
}

async fn describe_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TableRow>>, ServerError> {
    Ok(Json(state.descriptions.generate_descriptions().await?))
}

async fn suggestions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let suggestions = state.suggestions.suggest().await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}
