//! Chat: session creation, turns delivered as server-sent events, and the
//! explain-why follow-up.
//!
//! A turn is prepared to completion first (session, persistence, retrieval,
//! generation), then delivered: one `meta`, the answer re-segmented into
//! whitespace-preserving `token`s with a fixed pacing delay, one `done`.
//! Delivery checks the channel before every write and stops quietly when
//! the client has gone away or the process is shutting down.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{MessageRole, User};
use crate::error::TrainerError;
use crate::generation::{AssistanceRequest, ExplainRequest};
use crate::language::detect_language;
use crate::progress::credited_seconds;
use crate::protocol::{sources, ChatEvent, ExplainIn, ExplainOut, SessionOut, SourceOut, StreamQuery};
use crate::state::AppState;
use crate::vector_store::VectorQuery;

/// A fully computed turn, ready for delivery.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
  pub session_id: Uuid,
  pub module: String,
  pub sources: Vec<SourceOut>,
  pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
  Completed,
  /// Client closed the stream; no `done` was sent.
  Disconnected,
  /// Registry cancelled the stream; no `done` was sent.
  Shutdown,
}

const MODULE_NAME_CHARS: std::ops::RangeInclusive<usize> = 2..=100;

pub async fn open_session(state: &AppState, user: &User, module: &str) -> Result<SessionOut, TrainerError> {
  let module = module.trim();
  if !MODULE_NAME_CHARS.contains(&module.chars().count()) {
    return Err(TrainerError::InvalidRequest("module must be 2 to 100 characters".into()));
  }
  let session = state.store.create_session(user.id, module, None).await?;
  info!(target: "chat", user = %user.id, session = %session.id, module = %session.module, "Chat session opened");
  Ok(SessionOut { session_id: session.id, module: session.module, started_at: session.started_at })
}

/// Explain the reasoning behind an earlier answer. The explanation is
/// appended to the session only when the caller owns it.
#[instrument(level = "info", skip(state, user, input), fields(user = %user.id, session = ?input.session_id))]
pub async fn explain(state: &AppState, user: &User, input: ExplainIn) -> Result<ExplainOut, TrainerError> {
  if input.question.trim().is_empty() || input.answer.trim().is_empty() {
    return Err(TrainerError::InvalidRequest("question and answer must not be empty".into()));
  }
  let module = input.module.as_deref().map(str::trim).filter(|m| !m.is_empty()).map(str::to_string);
  let context = state
    .vectors
    .query(&VectorQuery::new(input.question.clone(), state.tuning.chat_top_k, module))
    .await;

  let explanation = state
    .llm
    .explain_why(ExplainRequest {
      question: &input.question,
      answer: &input.answer,
      language: &user.language,
      context: &context,
    })
    .await;

  if let Some(session_id) = input.session_id {
    match state.store.get_session(session_id).await? {
      Some(s) if s.user_id == user.id => {
        state
          .store
          .create_message(session_id, MessageRole::Assistant, &format!("Explain Why: {explanation}"))
          .await?;
      }
      _ => debug!(target: "chat", session = %session_id, "Explanation not attached: session missing or not owned"),
    }
  }

  Ok(ExplainOut { explanation, sources: sources(&context) })
}

/// Split into alternating runs of whitespace and non-whitespace. Joining the
/// pieces gives back the input exactly.
pub fn split_tokens(text: &str) -> Vec<&str> {
  let mut out = Vec::new();
  let mut start = 0;
  let mut in_space: Option<bool> = None;
  for (i, c) in text.char_indices() {
    let space = c.is_whitespace();
    if in_space.is_some_and(|prev| prev != space) {
      out.push(&text[start..i]);
      start = i;
    }
    in_space = Some(space);
  }
  if start < text.len() {
    out.push(&text[start..]);
  }
  out
}

#[instrument(level = "info", skip(state, user, q), fields(user = %user.id, session = ?q.session_id, module = ?q.module, message_len = q.message.len()))]
pub async fn prepare_turn(state: &AppState, user: &User, q: &StreamQuery) -> Result<PreparedTurn, TrainerError> {
  if q.message.trim().is_empty() {
    return Err(TrainerError::InvalidRequest("message must not be empty".into()));
  }

  let existing = match q.session_id {
    Some(id) => state.store.get_session(id).await?,
    None => None,
  };
  let module = q
    .module
    .as_deref()
    .map(str::trim)
    .filter(|m| !m.is_empty())
    .map(str::to_string)
    .or_else(|| existing.as_ref().map(|s| s.module.clone()))
    .unwrap_or_else(|| state.tuning.default_module.clone());

  let session = match existing {
    Some(s) => s,
    None => state.store.create_session(user.id, &module, q.session_id).await?,
  };
  if session.user_id != user.id {
    return Err(TrainerError::Forbidden);
  }

  state.store.touch_session(session.id).await?;
  state.store.create_message(session.id, MessageRole::User, &q.message).await?;

  let detected = detect_language(&q.message);
  let language = detected.unwrap_or(user.language.as_str()).to_string();
  if let Some(lang) = detected.filter(|l| *l != user.language) {
    info!(target: "chat", user = %user.id, from = %user.language, to = lang, "Response language switched");
    state.store.update_user(user.id, Some(lang.to_string()), None).await?;
  }

  let context = state
    .vectors
    .query(&VectorQuery::new(
      q.message.clone(),
      q.top_k.unwrap_or(state.tuning.chat_top_k),
      Some(module.clone()),
    ))
    .await;

  let answer = state
    .llm
    .generate_assistance(AssistanceRequest {
      question: &q.message,
      language: &language,
      skill_level: user.skill_level,
      module: &module,
      context: &context,
    })
    .await;

  // Persisted before delivery so a dropped stream still keeps the turn.
  state.store.create_message(session.id, MessageRole::Assistant, &answer).await?;

  let credited = credited_seconds(q.time_seconds, state.tuning.default_chat_seconds, state.tuning.min_chat_seconds);
  state.store.upsert_module_progress(user.id, &module, credited, false).await?;

  Ok(PreparedTurn { session_id: session.id, module, sources: sources(&context), answer })
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, cancel: &CancellationToken, event: ChatEvent) -> Result<(), DeliveryOutcome> {
  if cancel.is_cancelled() {
    return Err(DeliveryOutcome::Shutdown);
  }
  if tx.is_closed() {
    return Err(DeliveryOutcome::Disconnected);
  }
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(DeliveryOutcome::Shutdown),
    sent = tx.send(event) => sent.map_err(|_| DeliveryOutcome::Disconnected),
  }
}

async fn pace(cancel: &CancellationToken, delay: Duration) -> Result<(), DeliveryOutcome> {
  if delay.is_zero() {
    return Ok(());
  }
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(DeliveryOutcome::Shutdown),
    _ = tokio::time::sleep(delay) => Ok(()),
  }
}

async fn run_delivery(
  turn: &PreparedTurn,
  tx: &mpsc::Sender<ChatEvent>,
  delay: Duration,
  cancel: &CancellationToken,
) -> Result<(), DeliveryOutcome> {
  emit(
    tx,
    cancel,
    ChatEvent::Meta { session_id: turn.session_id, module: turn.module.clone(), sources: turn.sources.clone() },
  )
  .await?;
  for token in split_tokens(&turn.answer) {
    emit(tx, cancel, ChatEvent::Token { token: token.to_string() }).await?;
    pace(cancel, delay).await?;
  }
  emit(tx, cancel, ChatEvent::Done { session_id: turn.session_id, answer: turn.answer.clone() }).await
}

/// Write the turn's events in order. Never errors; the outcome says how it ended.
pub async fn deliver(
  turn: PreparedTurn,
  tx: mpsc::Sender<ChatEvent>,
  delay: Duration,
  cancel: CancellationToken,
) -> DeliveryOutcome {
  let outcome = match run_delivery(&turn, &tx, delay, &cancel).await {
    Ok(()) => DeliveryOutcome::Completed,
    Err(stopped) => stopped,
  };
  debug!(target: "chat", session = %turn.session_id, outcome = ?outcome, "Delivery finished");
  outcome
}
