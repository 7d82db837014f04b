//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{info, instrument};

use crate::error::TrainerError;
use crate::health;
use crate::protocol::*;
use crate::quiz;
use crate::routes::CurrentUser;
use crate::state::AppState;
use crate::streaming;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(health::snapshot(&state).await)
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.id, module = %body.module))]
pub async fn http_post_session(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<CreateSessionIn>,
) -> Result<impl IntoResponse, TrainerError> {
  let out = streaming::open_session(&state, &user, &body.module).await?;
  Ok((StatusCode::CREATED, Json(out)))
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.id, question_len = body.question.len()))]
pub async fn http_post_explain(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<ExplainIn>,
) -> Result<Json<ExplainOut>, TrainerError> {
  let out = streaming::explain(&state, &user, body).await?;
  info!(target: "chat", sources = out.sources.len(), "HTTP explain served");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.id))]
pub async fn http_post_quiz_start(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
  body: Option<Json<QuizStartIn>>,
) -> Result<impl IntoResponse, TrainerError> {
  let body = body.map(|Json(b)| b).unwrap_or_default();
  let module = body.module.as_deref().or(body.topic.as_deref());
  let out = quiz::start_quiz(&state, &user, module).await?;
  Ok((StatusCode::CREATED, Json(out)))
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.id, attempt = %body.attempt_id))]
pub async fn http_post_quiz_answer(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<QuizAnswerIn>,
) -> Result<Json<QuizAnswerOut>, TrainerError> {
  let out = quiz::submit_answer(&state, &user, body).await?;
  info!(target: "quiz", correct = out.correct, completed = out.completed, score = out.score_percent, "HTTP answer evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, user), fields(user = %user.id))]
pub async fn http_get_analytics(
  State(state): State<Arc<AppState>>,
  CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, TrainerError> {
  Ok(Json(state.store.get_analytics(user.id).await?))
}

#[instrument(level = "info", skip(user), fields(user = %user.id))]
pub async fn http_get_profile(CurrentUser(user): CurrentUser) -> impl IntoResponse {
  Json(ProfileOut::from(&user))
}

#[instrument(level = "info", skip(state, _user, body), fields(count = body.chunks.len()))]
pub async fn http_post_documents(
  State(state): State<Arc<AppState>>,
  CurrentUser(_user): CurrentUser,
  Json(body): Json<DocumentsIn>,
) -> Result<Json<DocumentsOut>, TrainerError> {
  if let Some(bad) = body.chunks.iter().find(|c| c.id.trim().is_empty() || c.text.trim().is_empty()) {
    return Err(TrainerError::InvalidRequest(format!("chunk '{}' needs a non-empty id and text", bad.id)));
  }
  state.vectors.upsert(&body.chunks).await;
  let local_chunks = state.vectors.local_len().await;
  info!(target: "retrieval", upserted = body.chunks.len(), local_chunks, "HTTP documents upserted");
  Ok(Json(DocumentsOut { upserted: body.chunks.len(), local_chunks }))
}
