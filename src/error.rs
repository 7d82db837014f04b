//! Error types.
//!
//! Only `TrainerError` reaches HTTP callers. Provider and remote-index failures
//! (`GenerationError`, `RetrievalError`) are recovered inside the core through
//! fallback paths and only ever show up in logs.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use thiserror::Error;

/// Coarse bucket attached to every error body so clients can offer the
/// right retry affordance.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
  Retrieval,
  Model,
  Network,
  Validation,
  Conflict,
  NotFound,
  Internal,
}

/// Errors surfaced to callers of the core.
#[derive(Debug, Error)]
pub enum TrainerError {
  #[error("question already answered")]
  DuplicateAnswer,

  #[error("quiz attempt not found")]
  AttemptNotFound,

  #[error("question not found for this attempt")]
  QuestionMismatch,

  #[error("forbidden")]
  Forbidden,

  #[error("missing or invalid caller identity")]
  Unauthorized,

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("store failure: {0}")]
  Store(String),
}

impl TrainerError {
  pub fn status(&self) -> StatusCode {
    match self {
      TrainerError::DuplicateAnswer => StatusCode::CONFLICT,
      TrainerError::AttemptNotFound | TrainerError::QuestionMismatch => StatusCode::NOT_FOUND,
      TrainerError::Forbidden => StatusCode::FORBIDDEN,
      TrainerError::Unauthorized => StatusCode::UNAUTHORIZED,
      TrainerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
      TrainerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn category(&self) -> FailureCategory {
    match self {
      TrainerError::DuplicateAnswer => FailureCategory::Conflict,
      TrainerError::AttemptNotFound | TrainerError::QuestionMismatch => FailureCategory::NotFound,
      TrainerError::Forbidden | TrainerError::Unauthorized | TrainerError::InvalidRequest(_) => {
        FailureCategory::Validation
      }
      TrainerError::Store(_) => FailureCategory::Internal,
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
  category: FailureCategory,
}

impl IntoResponse for TrainerError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(target: "sop_trainer", error = %self, "request failed");
    }
    let body = ErrorBody { error: self.to_string(), category: self.category() };
    (status, Json(body)).into_response()
  }
}

/// Failure of one generation provider attempt.
#[derive(Debug, Error)]
pub enum GenerationError {
  #[error("provider HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("provider transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("provider returned no text")]
  Empty,

  #[error("malformed generation output: {0}")]
  Malformed(String),
}

impl GenerationError {
  pub fn category(&self) -> FailureCategory {
    match self {
      GenerationError::Transport(_) => FailureCategory::Network,
      _ => FailureCategory::Model,
    }
  }
}

/// Failure of the remote vector index. Served from the in-process copy instead.
#[derive(Debug, Error)]
pub enum RetrievalError {
  #[error("remote index transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("remote index timed out after {0} ms")]
  Timeout(u64),

  #[error("remote index HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("remote index response could not be decoded: {0}")]
  Decode(String),
}

impl RetrievalError {
  pub fn category(&self) -> FailureCategory {
    match self {
      RetrievalError::Transport(_) | RetrievalError::Timeout(_) => FailureCategory::Network,
      _ => FailureCategory::Retrieval,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn domain_errors_map_to_http_statuses() {
    assert_eq!(TrainerError::DuplicateAnswer.status(), StatusCode::CONFLICT);
    assert_eq!(TrainerError::AttemptNotFound.status(), StatusCode::NOT_FOUND);
    assert_eq!(TrainerError::QuestionMismatch.status(), StatusCode::NOT_FOUND);
    assert_eq!(TrainerError::Store("x".into()).category(), FailureCategory::Internal);
  }

  #[test]
  fn infra_errors_are_classified() {
    assert_eq!(RetrievalError::Timeout(3000).category(), FailureCategory::Network);
    assert_eq!(RetrievalError::Decode("bad".into()).category(), FailureCategory::Retrieval);
    assert_eq!(GenerationError::Empty.category(), FailureCategory::Model);
  }
}
