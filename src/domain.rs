//! Domain models: training chunks, users/sessions/messages, quiz records,
//! module progress and the derived analytics snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Indexed unit of training content. Re-upserting the same `id` replaces it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
  pub id: String,
  pub text: String,
  pub module: String,
  pub source: String,
  #[serde(default)]
  pub metadata: Map<String, Value>,
}

/// A chunk plus its relevance for one query. Never persisted.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RetrievedChunk {
  #[serde(flatten)]
  pub chunk: Chunk,
  pub score: f32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
  #[default]
  Beginner,
  Intermediate,
  Advanced,
}

impl SkillLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      SkillLevel::Beginner => "beginner",
      SkillLevel::Intermediate => "intermediate",
      SkillLevel::Advanced => "advanced",
    }
  }
}

/// Learner profile as seen by the core. Credentials live with the auth collaborator.
#[derive(Clone, Debug, Serialize)]
pub struct User {
  pub id: Uuid,
  pub language: String,
  pub skill_level: SkillLevel,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrainingSession {
  pub id: Uuid,
  pub user_id: Uuid,
  pub module: String,
  pub started_at: DateTime<Utc>,
  pub last_active_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
  User,
  Assistant,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
  pub id: Uuid,
  pub session_id: Uuid,
  pub role: MessageRole,
  pub content: String,
  pub created_at: DateTime<Utc>,
}

/// Question shape. Options only exist for multiple choice, so the
/// "options non-null iff multiple_choice" rule holds by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuestionKind {
  MultipleChoice { options: Vec<String> },
  ShortAnswer,
}

impl QuestionKind {
  pub fn type_name(&self) -> &'static str {
    match self {
      QuestionKind::MultipleChoice { .. } => "multiple_choice",
      QuestionKind::ShortAnswer => "short_answer",
    }
  }

  pub fn options(&self) -> Option<&[String]> {
    match self {
      QuestionKind::MultipleChoice { options } => Some(options),
      QuestionKind::ShortAnswer => None,
    }
  }
}

/// A generated question before it is attached to an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizQuestionDraft {
  pub prompt: String,
  pub kind: QuestionKind,
  pub answer_key: String,
  pub explanation: String,
}

#[derive(Clone, Debug)]
pub struct QuizQuestion {
  pub id: Uuid,
  pub attempt_id: Uuid,
  pub position: usize,
  pub prompt: String,
  pub kind: QuestionKind,
  pub answer_key: String,
  pub explanation: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuizAttempt {
  pub id: Uuid,
  pub user_id: Uuid,
  pub module: String,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub score: Option<u32>,
  pub total_questions: usize,
}

impl QuizAttempt {
  pub fn is_completed(&self) -> bool {
    self.completed_at.is_some()
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct QuizAnswer {
  pub id: Uuid,
  pub attempt_id: Uuid,
  pub question_id: Uuid,
  pub user_answer: String,
  pub is_correct: bool,
  pub explanation: String,
  pub answered_at: DateTime<Utc>,
}

/// Per (user, module) accumulation. Time only grows; `completed` is sticky.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
  pub user_id: Uuid,
  pub module: String,
  pub completed: bool,
  pub completed_at: Option<DateTime<Utc>>,
  pub time_on_task_seconds: u64,
  pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBreakdown {
  pub module: String,
  pub completed: bool,
  pub time_on_task_seconds: u64,
  pub best_score: Option<u32>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentScore {
  pub module: String,
  pub score: u32,
  pub completed_at: DateTime<Utc>,
}

/// Read-only aggregate over one user's attempts and progress.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
  pub user_id: Uuid,
  pub current_skill_level: SkillLevel,
  pub total_quiz_attempts: usize,
  pub average_quiz_score: u32,
  pub completed_modules: usize,
  pub total_time_on_task_seconds: u64,
  pub module_breakdown: Vec<ModuleBreakdown>,
  pub recent_quiz_scores: Vec<RecentScore>,
}
