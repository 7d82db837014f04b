//! Persistence collaborator.
//!
//! The core only needs simple CRUD over users, sessions, messages, quiz
//! records and module progress. `DataStore` is that seam; `InMemoryStore`
//! backs it for single-process deployments and tests. A relational backend
//! would implement the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
  AnalyticsSnapshot, ChatMessage, MessageRole, ModuleProgress, QuizAnswer, QuizAttempt, QuizQuestion,
  QuizQuestionDraft, SkillLevel, TrainingSession, User,
};
use crate::error::TrainerError;
use crate::progress;

pub type StoreResult<T> = Result<T, TrainerError>;

#[derive(Clone, Debug)]
pub struct NewAnswer {
  pub attempt_id: Uuid,
  pub question_id: Uuid,
  pub user_answer: String,
  pub is_correct: bool,
  pub explanation: String,
}

#[async_trait]
pub trait DataStore: Send + Sync {
  /// Resolve a caller id to a profile, creating a default one on first sight.
  async fn get_or_create_user(&self, id: Uuid, language: &str) -> StoreResult<User>;
  async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
  async fn update_user(&self, id: Uuid, language: Option<String>, skill_level: Option<SkillLevel>) -> StoreResult<Option<User>>;

  async fn create_session(&self, user_id: Uuid, module: &str, id: Option<Uuid>) -> StoreResult<TrainingSession>;
  async fn get_session(&self, id: Uuid) -> StoreResult<Option<TrainingSession>>;
  async fn touch_session(&self, id: Uuid) -> StoreResult<()>;

  async fn create_message(&self, session_id: Uuid, role: MessageRole, content: &str) -> StoreResult<ChatMessage>;
  async fn list_messages(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>>;

  async fn create_quiz_attempt(&self, user_id: Uuid, module: &str, total_questions: usize) -> StoreResult<QuizAttempt>;
  async fn get_quiz_attempt(&self, id: Uuid) -> StoreResult<Option<QuizAttempt>>;
  async fn list_quiz_attempts(&self, user_id: Uuid) -> StoreResult<Vec<QuizAttempt>>;
  /// Sets `completed_at` and `score` together. Returns false if the attempt was already completed.
  async fn complete_quiz_attempt(&self, id: Uuid, score: u32) -> StoreResult<bool>;

  /// Stores drafts in order; positions start at 0.
  async fn create_quiz_questions(&self, attempt_id: Uuid, drafts: &[QuizQuestionDraft]) -> StoreResult<Vec<QuizQuestion>>;
  async fn get_quiz_question(&self, id: Uuid) -> StoreResult<Option<QuizQuestion>>;

  /// Fails with `DuplicateAnswer` if the (attempt, question) pair already has an answer.
  async fn create_quiz_answer(&self, answer: NewAnswer) -> StoreResult<QuizAnswer>;
  async fn list_quiz_answers(&self, attempt_id: Uuid) -> StoreResult<Vec<QuizAnswer>>;

  async fn upsert_module_progress(&self, user_id: Uuid, module: &str, time_delta_seconds: u64, completed: bool) -> StoreResult<ModuleProgress>;
  async fn list_module_progress(&self, user_id: Uuid) -> StoreResult<Vec<ModuleProgress>>;

  async fn get_analytics(&self, user_id: Uuid) -> StoreResult<AnalyticsSnapshot> {
    let skill = self.get_user(user_id).await?.map(|u| u.skill_level).unwrap_or_default();
    let attempts = self.list_quiz_attempts(user_id).await?;
    let progress = self.list_module_progress(user_id).await?;
    Ok(progress::snapshot(user_id, skill, &attempts, &progress))
  }
}

#[derive(Default)]
struct Tables {
  users: HashMap<Uuid, User>,
  sessions: HashMap<Uuid, TrainingSession>,
  messages: Vec<ChatMessage>,
  attempts: HashMap<Uuid, QuizAttempt>,
  attempt_order: Vec<Uuid>,
  questions: HashMap<Uuid, QuizQuestion>,
  answers: Vec<QuizAnswer>,
  progress: Vec<ModuleProgress>,
}

/// All tables behind one lock, so every write is atomic with respect to
/// the checks it depends on (duplicate answers, one-time completion).
#[derive(Default)]
pub struct InMemoryStore {
  tables: RwLock<Tables>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl DataStore for InMemoryStore {
  async fn get_or_create_user(&self, id: Uuid, language: &str) -> StoreResult<User> {
    let mut t = self.tables.write().await;
    let user = t.users.entry(id).or_insert_with(|| User {
      id,
      language: language.to_string(),
      skill_level: SkillLevel::Beginner,
      created_at: Utc::now(),
    });
    Ok(user.clone())
  }

  async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
    Ok(self.tables.read().await.users.get(&id).cloned())
  }

  async fn update_user(&self, id: Uuid, language: Option<String>, skill_level: Option<SkillLevel>) -> StoreResult<Option<User>> {
    let mut t = self.tables.write().await;
    let Some(user) = t.users.get_mut(&id) else {
      return Ok(None);
    };
    if let Some(l) = language {
      user.language = l;
    }
    if let Some(s) = skill_level {
      user.skill_level = s;
    }
    Ok(Some(user.clone()))
  }

  async fn create_session(&self, user_id: Uuid, module: &str, id: Option<Uuid>) -> StoreResult<TrainingSession> {
    let now = Utc::now();
    let session = TrainingSession {
      id: id.unwrap_or_else(Uuid::new_v4),
      user_id,
      module: module.to_string(),
      started_at: now,
      last_active_at: now,
    };
    self.tables.write().await.sessions.insert(session.id, session.clone());
    Ok(session)
  }

  async fn get_session(&self, id: Uuid) -> StoreResult<Option<TrainingSession>> {
    Ok(self.tables.read().await.sessions.get(&id).cloned())
  }

  async fn touch_session(&self, id: Uuid) -> StoreResult<()> {
    if let Some(s) = self.tables.write().await.sessions.get_mut(&id) {
      s.last_active_at = Utc::now();
    }
    Ok(())
  }

  async fn create_message(&self, session_id: Uuid, role: MessageRole, content: &str) -> StoreResult<ChatMessage> {
    let msg = ChatMessage { id: Uuid::new_v4(), session_id, role, content: content.to_string(), created_at: Utc::now() };
    self.tables.write().await.messages.push(msg.clone());
    Ok(msg)
  }

  async fn list_messages(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
    let t = self.tables.read().await;
    Ok(t.messages.iter().filter(|m| m.session_id == session_id).cloned().collect())
  }

  async fn create_quiz_attempt(&self, user_id: Uuid, module: &str, total_questions: usize) -> StoreResult<QuizAttempt> {
    let attempt = QuizAttempt {
      id: Uuid::new_v4(),
      user_id,
      module: module.to_string(),
      started_at: Utc::now(),
      completed_at: None,
      score: None,
      total_questions,
    };
    let mut t = self.tables.write().await;
    t.attempt_order.push(attempt.id);
    t.attempts.insert(attempt.id, attempt.clone());
    Ok(attempt)
  }

  async fn get_quiz_attempt(&self, id: Uuid) -> StoreResult<Option<QuizAttempt>> {
    Ok(self.tables.read().await.attempts.get(&id).cloned())
  }

  async fn list_quiz_attempts(&self, user_id: Uuid) -> StoreResult<Vec<QuizAttempt>> {
    let t = self.tables.read().await;
    Ok(
      t.attempt_order
        .iter()
        .filter_map(|id| t.attempts.get(id))
        .filter(|a| a.user_id == user_id)
        .cloned()
        .collect(),
    )
  }

  async fn complete_quiz_attempt(&self, id: Uuid, score: u32) -> StoreResult<bool> {
    let mut t = self.tables.write().await;
    let attempt = t.attempts.get_mut(&id).ok_or(TrainerError::AttemptNotFound)?;
    if attempt.completed_at.is_some() {
      return Ok(false);
    }
    attempt.completed_at = Some(Utc::now());
    attempt.score = Some(score);
    Ok(true)
  }

  async fn create_quiz_questions(&self, attempt_id: Uuid, drafts: &[QuizQuestionDraft]) -> StoreResult<Vec<QuizQuestion>> {
    let stored: Vec<QuizQuestion> = drafts
      .iter()
      .enumerate()
      .map(|(position, d)| QuizQuestion {
        id: Uuid::new_v4(),
        attempt_id,
        position,
        prompt: d.prompt.clone(),
        kind: d.kind.clone(),
        answer_key: d.answer_key.clone(),
        explanation: d.explanation.clone(),
      })
      .collect();
    let mut t = self.tables.write().await;
    for q in &stored {
      t.questions.insert(q.id, q.clone());
    }
    Ok(stored)
  }

  async fn get_quiz_question(&self, id: Uuid) -> StoreResult<Option<QuizQuestion>> {
    Ok(self.tables.read().await.questions.get(&id).cloned())
  }

  async fn create_quiz_answer(&self, answer: NewAnswer) -> StoreResult<QuizAnswer> {
    let mut t = self.tables.write().await;
    if t.answers.iter().any(|a| a.attempt_id == answer.attempt_id && a.question_id == answer.question_id) {
      return Err(TrainerError::DuplicateAnswer);
    }
    let stored = QuizAnswer {
      id: Uuid::new_v4(),
      attempt_id: answer.attempt_id,
      question_id: answer.question_id,
      user_answer: answer.user_answer,
      is_correct: answer.is_correct,
      explanation: answer.explanation,
      answered_at: Utc::now(),
    };
    t.answers.push(stored.clone());
    Ok(stored)
  }

  async fn list_quiz_answers(&self, attempt_id: Uuid) -> StoreResult<Vec<QuizAnswer>> {
    let t = self.tables.read().await;
    Ok(t.answers.iter().filter(|a| a.attempt_id == attempt_id).cloned().collect())
  }

  async fn upsert_module_progress(&self, user_id: Uuid, module: &str, time_delta_seconds: u64, completed: bool) -> StoreResult<ModuleProgress> {
    let mut t = self.tables.write().await;
    let now = Utc::now();
    match t.progress.iter_mut().find(|p| p.user_id == user_id && p.module == module) {
      Some(slot) => {
        let updated = progress::accumulate(Some(slot.clone()), user_id, module, time_delta_seconds, completed, now);
        *slot = updated.clone();
        Ok(updated)
      }
      None => {
        let created = progress::accumulate(None, user_id, module, time_delta_seconds, completed, now);
        t.progress.push(created.clone());
        Ok(created)
      }
    }
  }

  async fn list_module_progress(&self, user_id: Uuid) -> StoreResult<Vec<ModuleProgress>> {
    let t = self.tables.read().await;
    Ok(t.progress.iter().filter(|p| p.user_id == user_id).cloned().collect())
  }
}
