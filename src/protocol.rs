//! Public protocol structs for the HTTP and SSE endpoints (serde ready).
//! Field names follow the camelCase wire format the web client expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Chunk, QuizQuestion, RetrievedChunk, SkillLevel, User};

/// Ranked source reference shown next to an answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceOut {
  pub id: String,
  pub source: String,
  pub score: f32,
}

impl From<&RetrievedChunk> for SourceOut {
  fn from(c: &RetrievedChunk) -> Self {
    Self { id: c.chunk.id.clone(), source: c.chunk.source.clone(), score: c.score }
  }
}

pub fn sources(chunks: &[RetrievedChunk]) -> Vec<SourceOut> {
  chunks.iter().map(SourceOut::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionIn {
  pub module: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
  pub session_id: Uuid,
  pub module: String,
  pub started_at: DateTime<Utc>,
}

/// Query string of `GET /chat/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
  pub session_id: Option<Uuid>,
  pub message: String,
  pub module: Option<String>,
  pub top_k: Option<usize>,
  pub time_seconds: Option<f64>,
}

/// Events of one chat turn, in wire order: one `meta`, any number of
/// `token`s, one `done`. Serialized untagged; the SSE event name carries the tag.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ChatEvent {
  Meta {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
    module: String,
    sources: Vec<SourceOut>,
  },
  Token {
    token: String,
  },
  Done {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
    answer: String,
  },
}

impl ChatEvent {
  pub fn name(&self) -> &'static str {
    match self {
      ChatEvent::Meta { .. } => "meta",
      ChatEvent::Token { .. } => "token",
      ChatEvent::Done { .. } => "done",
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainIn {
  pub session_id: Option<Uuid>,
  pub module: Option<String>,
  pub question: String,
  pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct ExplainOut {
  pub explanation: String,
  pub sources: Vec<SourceOut>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuizStartIn {
  pub module: Option<String>,
  pub topic: Option<String>,
}

/// Learner-safe view of a question: no answer key, no explanation.
#[derive(Debug, Serialize)]
pub struct QuestionOut {
  pub id: Uuid,
  pub position: usize,
  pub prompt: String,
  #[serde(rename = "type")]
  pub kind: &'static str,
  pub options: Option<Vec<String>>,
}

impl From<&QuizQuestion> for QuestionOut {
  fn from(q: &QuizQuestion) -> Self {
    Self {
      id: q.id,
      position: q.position,
      prompt: q.prompt.clone(),
      kind: q.kind.type_name(),
      options: q.kind.options().map(|o| o.to_vec()),
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStartOut {
  pub attempt_id: Uuid,
  pub module: String,
  pub questions: Vec<QuestionOut>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerIn {
  pub attempt_id: Uuid,
  pub question_id: Uuid,
  pub user_answer: String,
  pub time_on_task_seconds: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerOut {
  pub correct: bool,
  pub feedback: String,
  pub explanation: String,
  pub completed: bool,
  pub score_percent: u32,
  pub answered_count: usize,
  pub total_questions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOut {
  pub user_id: Uuid,
  pub language: String,
  pub skill_level: SkillLevel,
}

impl From<&User> for ProfileOut {
  fn from(u: &User) -> Self {
    Self { user_id: u.id, language: u.language.clone(), skill_level: u.skill_level }
  }
}

#[derive(Debug, Deserialize)]
pub struct DocumentsIn {
  pub chunks: Vec<Chunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentsOut {
  pub upserted: usize,
  pub local_chunks: usize,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::QuestionKind;

  #[test]
  fn chat_events_serialize_to_wire_payloads() {
    let id = Uuid::nil();
    let meta = ChatEvent::Meta {
      session_id: id,
      module: "Safety".into(),
      sources: vec![SourceOut { id: "c1".into(), source: "sop.md".into(), score: 0.5 }],
    };
    assert_eq!(meta.name(), "meta");
    assert_eq!(
      serde_json::to_value(&meta).unwrap(),
      serde_json::json!({
        "sessionId": id,
        "module": "Safety",
        "sources": [{"id": "c1", "source": "sop.md", "score": 0.5}]
      })
    );
    let token = ChatEvent::Token { token: " ".into() };
    assert_eq!(serde_json::to_string(&token).unwrap(), r#"{"token":" "}"#);
  }

  #[test]
  fn question_out_hides_answer_key() {
    let q = QuizQuestion {
      id: Uuid::new_v4(),
      attempt_id: Uuid::new_v4(),
      position: 0,
      prompt: "Which PPE?".into(),
      kind: QuestionKind::MultipleChoice { options: vec!["A) Gloves".into(), "B) None".into()] },
      answer_key: "A".into(),
      explanation: "Gloves are required.".into(),
    };
    let v = serde_json::to_value(QuestionOut::from(&q)).unwrap();
    assert_eq!(v["type"], "multiple_choice");
    assert_eq!(v["options"][1], "B) None");
    assert!(v.get("answerKey").is_none());
    assert!(v.get("explanation").is_none());
  }

  #[test]
  fn answer_in_reads_camel_case() {
    let raw = r#"{"attemptId":"00000000-0000-0000-0000-000000000000","questionId":"00000000-0000-0000-0000-000000000000","userAnswer":"b"}"#;
    let parsed: QuizAnswerIn = serde_json::from_str(raw).unwrap();
    assert_eq!(parsed.user_answer, "b");
    assert!(parsed.time_on_task_seconds.is_none());
  }
}
