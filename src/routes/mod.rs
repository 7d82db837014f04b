//! Router assembly: HTTP endpoints, the chat event stream, caller identity, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::ACCEPT_LANGUAGE, request::Parts},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use uuid::Uuid;

use crate::domain::User;
use crate::error::TrainerError;
use crate::language::normalize_language;
use crate::state::AppState;

pub mod http;
pub mod sse;

/// Set by the upstream auth layer once the caller is authenticated.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated learner. Unknown ids get a default profile on first use.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = TrainerError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(TrainerError::Unauthorized)?;
        let language = parts
            .headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next());
        let user = state.store.get_or_create_user(id, &normalize_language(language)).await?;
        Ok(CurrentUser(user))
    }
}

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - chat answers as server-sent events at `/api/v1/chat/stream`
/// - CORS (allow any origin/method/headers); adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Chat
        .route("/api/v1/chat/session", post(http::http_post_session))
        .route("/api/v1/chat/stream", get(sse::sse_chat_stream))
        .route("/api/v1/chat/explain", post(http::http_post_explain))
        // Quiz
        .route("/api/v1/quiz/start", post(http::http_post_quiz_start))
        .route("/api/v1/quiz/answer", post(http::http_post_quiz_answer))
        // Learner
        .route("/api/v1/me/analytics", get(http::http_get_analytics))
        .route("/api/v1/me/profile", get(http::http_get_profile))
        // Content
        .route("/api/v1/documents", post(http::http_post_documents))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}
