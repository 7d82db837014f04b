//! Generation client: builds prompts, walks the provider chain in priority
//! order, validates structured output, and ends in deterministic fallback
//! content so callers always get a usable result.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{Prompts, Settings};
use crate::domain::{QuestionKind, QuizQuestionDraft, RetrievedChunk, SkillLevel};
use crate::error::GenerationError;
use crate::fallback;
use crate::profiling::skill_prompt_guide;
use crate::providers::{GeminiProvider, OpenAiProvider, Provider};
use crate::util::{fill_template, trunc_for_log};

const MIN_QUIZ_ITEMS: usize = 3;
const MIN_PROMPT_CHARS: usize = 5;
const MIN_EXPLANATION_CHARS: usize = 5;

#[derive(Clone, Debug)]
pub struct AssistanceRequest<'a> {
  pub question: &'a str,
  pub language: &'a str,
  pub skill_level: SkillLevel,
  pub module: &'a str,
  pub context: &'a [RetrievedChunk],
}

#[derive(Clone, Debug)]
pub struct QuizRequest<'a> {
  pub topic: &'a str,
  pub language: &'a str,
  pub skill_level: SkillLevel,
  pub context: &'a [RetrievedChunk],
}

#[derive(Clone, Debug)]
pub struct ExplainRequest<'a> {
  pub question: &'a str,
  pub answer: &'a str,
  pub language: &'a str,
  pub context: &'a [RetrievedChunk],
}

pub struct GenerationClient {
  providers: Vec<Arc<dyn Provider>>,
  prompts: Prompts,
}

impl GenerationClient {
  pub fn new(providers: Vec<Arc<dyn Provider>>, prompts: Prompts) -> Self {
    Self { providers, prompts }
  }

  /// Gemini first, then OpenAI; only providers with credentials are included.
  pub fn from_settings(settings: &Settings) -> Self {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    if let Some(g) = &settings.gemini {
      match GeminiProvider::new(g) {
        Ok(p) => providers.push(Arc::new(p)),
        Err(e) => warn!(target: "generation", error = %e, "Gemini client could not be built; skipping"),
      }
    }
    if let Some(o) = &settings.openai {
      match OpenAiProvider::new(o) {
        Ok(p) => providers.push(Arc::new(p)),
        Err(e) => warn!(target: "generation", error = %e, "OpenAI client could not be built; skipping"),
      }
    }
    if providers.is_empty() {
      info!(target: "generation", "No generation provider configured. Using deterministic fallback content.");
    } else {
      let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
      info!(target: "generation", providers = ?names, "Generation providers enabled.");
    }
    Self::new(providers, settings.prompts.clone())
  }

  pub fn provider_names(&self) -> Vec<String> {
    self.providers.iter().map(|p| p.name().to_string()).collect()
  }

  /// First successful provider output, or `None` when every provider failed.
  async fn run_model(&self, system: &str, prompt: &str) -> Option<String> {
    for p in &self.providers {
      match p.generate(system, prompt).await {
        Ok(text) => {
          debug!(target: "generation", provider = p.name(), preview = %trunc_for_log(&text, 60), "Provider answered");
          return Some(text);
        }
        Err(e) => {
          warn!(target: "generation", provider = p.name(), error = %e, category = ?e.category(), "Provider failed; trying next");
        }
      }
    }
    None
  }

  #[instrument(level = "info", skip(self, req), fields(module = %req.module, language = %req.language, skill = req.skill_level.as_str(), context = req.context.len()))]
  pub async fn generate_assistance(&self, req: AssistanceRequest<'_>) -> String {
    let system = fill_template(
      &self.prompts.assistance_system,
      &[("language", req.language), ("skill_guide", skill_prompt_guide(req.skill_level))],
    );
    let context = context_text(req.context);
    let prompt = fill_template(
      &self.prompts.assistance_user_template,
      &[
        ("module", req.module),
        ("question", req.question),
        ("context", or_placeholder(&context, "No retrieved context found.")),
      ],
    );

    match self.run_model(&system, &prompt).await {
      Some(answer) => answer,
      None => {
        info!(target: "generation", "Generation unavailable; using templated assistance");
        fallback::assistance_answer(req.module, req.context)
      }
    }
  }

  #[instrument(level = "info", skip(self, req), fields(topic = %req.topic, language = %req.language, skill = req.skill_level.as_str(), context = req.context.len()))]
  pub async fn generate_quiz(&self, req: QuizRequest<'_>) -> Vec<QuizQuestionDraft> {
    let system = fill_template(
      &self.prompts.quiz_system,
      &[("language", req.language), ("skill_guide", skill_prompt_guide(req.skill_level))],
    );
    let context = context_text(req.context);
    let prompt = fill_template(
      &self.prompts.quiz_user_template,
      &[("topic", req.topic), ("context", or_placeholder(&context, "No context found."))],
    );

    if let Some(raw) = self.run_model(&system, &prompt).await {
      match parse_quiz(&raw) {
        Ok(items) => {
          info!(target: "generation", count = items.len(), "Quiz generated by provider");
          return items;
        }
        Err(e) => {
          warn!(target: "generation", error = %e, preview = %trunc_for_log(&raw, 80), "Discarding provider quiz output");
        }
      }
    }
    info!(target: "generation", "Using deterministic fallback quiz");
    fallback::quiz(req.topic)
  }

  #[instrument(level = "info", skip(self, req), fields(language = %req.language, context = req.context.len()))]
  pub async fn explain_why(&self, req: ExplainRequest<'_>) -> String {
    let system = fill_template(&self.prompts.explain_system, &[("language", req.language)]);
    let prompt = serde_json::json!({
      "task": "explain_reasoning",
      "question": req.question,
      "answer": req.answer,
      "context": context_text(req.context),
    });
    let prompt = serde_json::to_string_pretty(&prompt).unwrap_or_else(|_| prompt.to_string());

    match self.run_model(&system, &prompt).await {
      Some(text) => text,
      None => fallback::explanation(),
    }
  }
}

fn or_placeholder<'a>(s: &'a str, placeholder: &'a str) -> &'a str {
  if s.is_empty() {
    placeholder
  } else {
    s
  }
}

/// `[n] (source) text` per chunk, one per line.
fn context_text(chunks: &[RetrievedChunk]) -> String {
  chunks
    .iter()
    .enumerate()
    .map(|(i, c)| format!("[{}] ({}) {}", i + 1, c.chunk.source, c.chunk.text))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Pull the body out of a ```json (or bare ```) fence if present.
fn strip_code_fence(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(start) = trimmed.find("```") else {
    return trimmed;
  };
  let after = &trimmed[start + 3..];
  let after = match after.get(..4) {
    Some(tag) if tag.eq_ignore_ascii_case("json") => &after[4..],
    _ => after,
  };
  match after.find("```") {
    Some(end) => after[..end].trim(),
    None => trimmed,
  }
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
enum RawQuestionType {
  MultipleChoice,
  ShortAnswer,
}

#[derive(Deserialize)]
struct RawQuizItem {
  prompt: String,
  #[serde(rename = "type")]
  kind: RawQuestionType,
  #[serde(default)]
  options: Option<Vec<String>>,
  #[serde(rename = "answerKey")]
  answer_key: String,
  explanation: String,
}

/// Parse and validate provider quiz output. Any violation rejects the whole set.
pub fn parse_quiz(raw: &str) -> Result<Vec<QuizQuestionDraft>, GenerationError> {
  let body = strip_code_fence(raw);
  let items: Vec<RawQuizItem> =
    serde_json::from_str(body).map_err(|e| GenerationError::Malformed(format!("JSON: {e}")))?;
  if items.len() < MIN_QUIZ_ITEMS {
    return Err(GenerationError::Malformed(format!("expected at least {MIN_QUIZ_ITEMS} questions, got {}", items.len())));
  }
  items.into_iter().enumerate().map(|(i, item)| validate_item(i, item)).collect()
}

fn validate_item(i: usize, item: RawQuizItem) -> Result<QuizQuestionDraft, GenerationError> {
  let bad = |why: &str| GenerationError::Malformed(format!("question {}: {}", i + 1, why));

  if item.prompt.trim().chars().count() < MIN_PROMPT_CHARS {
    return Err(bad("prompt too short"));
  }
  if item.explanation.trim().chars().count() < MIN_EXPLANATION_CHARS {
    return Err(bad("explanation too short"));
  }
  let answer_key = item.answer_key.trim().to_string();
  if answer_key.is_empty() {
    return Err(bad("empty answerKey"));
  }

  let kind = match item.kind {
    RawQuestionType::ShortAnswer => QuestionKind::ShortAnswer,
    RawQuestionType::MultipleChoice => {
      let options = item.options.unwrap_or_default();
      if options.is_empty() {
        return Err(bad("multiple choice without options"));
      }
      let mut letters = answer_key.chars();
      let letter = match (letters.next(), letters.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
        _ => return Err(bad("multiple choice answerKey must be a single option letter")),
      };
      if (letter as u8 - b'A') as usize >= options.len() {
        return Err(bad("answerKey letter outside option range"));
      }
      QuestionKind::MultipleChoice { options }
    }
  };

  Ok(QuizQuestionDraft { prompt: item.prompt.trim().to_string(), kind, answer_key, explanation: item.explanation.trim().to_string() })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Chunk;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Scripted provider: fails or answers with a fixed text, recording prompts.
  struct Scripted {
    name: &'static str,
    reply: Option<String>,
    calls: AtomicUsize,
    last_system: Mutex<String>,
  }

  impl Scripted {
    fn ok(name: &'static str, reply: &str) -> Arc<Self> {
      Arc::new(Self { name, reply: Some(reply.into()), calls: AtomicUsize::new(0), last_system: Mutex::new(String::new()) })
    }
    fn failing(name: &'static str) -> Arc<Self> {
      Arc::new(Self { name, reply: None, calls: AtomicUsize::new(0), last_system: Mutex::new(String::new()) })
    }
  }

  #[async_trait]
  impl Provider for Scripted {
    fn name(&self) -> &str {
      self.name
    }
    async fn generate(&self, system: &str, _prompt: &str) -> Result<String, GenerationError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      *self.last_system.lock().unwrap() = system.to_string();
      match &self.reply {
        Some(r) => Ok(r.clone()),
        None => Err(GenerationError::Http { status: 503, message: "overloaded".into() }),
      }
    }
  }

  fn ctx() -> Vec<RetrievedChunk> {
    vec![RetrievedChunk {
      chunk: Chunk {
        id: "1".into(),
        text: "Apply lockout tagout before maintenance.".into(),
        module: "Safety Basics".into(),
        source: "loto.md".into(),
        metadata: Default::default(),
      },
      score: 0.8,
    }]
  }

  const GOOD_QUIZ: &str = r#"```json
[
  {"prompt": "Which PPE is required at the press?", "type": "multiple_choice",
   "options": ["A) None", "B) Safety glasses and gloves", "C) Sandals"], "answerKey": "b",
   "explanation": "Press work requires eye and hand protection."},
  {"prompt": "Why do we lock out energy sources?", "type": "short_answer",
   "answerKey": "prevent accidental startup", "explanation": "Stored energy can injure."},
  {"prompt": "What do you do with a cracked guard?", "type": "multiple_choice",
   "options": ["A) Report and tag out", "B) Keep running"], "answerKey": "A",
   "explanation": "Damaged guards must be reported."}
]
```"#;

  #[tokio::test]
  async fn falls_through_to_next_provider() {
    let first = Scripted::failing("primary");
    let second = Scripted::ok("secondary", "Stop the line and call your lead.");
    let client = GenerationClient::new(vec![first.clone() as Arc<dyn Provider>, second.clone()], Prompts::default());

    let context = ctx();
    let answer = client
      .generate_assistance(AssistanceRequest {
        question: "What now?",
        language: "es",
        skill_level: SkillLevel::Advanced,
        module: "Safety Basics",
        context: &context,
      })
      .await;

    assert_eq!(answer, "Stop the line and call your lead.");
    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    let system = second.last_system.lock().unwrap().clone();
    assert!(system.contains("language code: es"));
    assert!(system.contains("standards"));
  }

  #[tokio::test]
  async fn no_providers_uses_templated_answers() {
    let client = GenerationClient::new(vec![], Prompts::default());
    let context = ctx();
    let answer = client
      .generate_assistance(AssistanceRequest {
        question: "How do I service the press?",
        language: "en",
        skill_level: SkillLevel::Beginner,
        module: "Safety Basics",
        context: &context,
      })
      .await;
    assert!(answer.contains("Apply lockout tagout before maintenance."));

    let explanation = client
      .explain_why(ExplainRequest { question: "q", answer: "a", language: "en", context: &context })
      .await;
    assert_eq!(explanation, fallback::explanation());
  }

  #[tokio::test]
  async fn valid_provider_quiz_is_used() {
    let client = GenerationClient::new(vec![Scripted::ok("p", GOOD_QUIZ) as Arc<dyn Provider>], Prompts::default());
    let context = ctx();
    let qs = client
      .generate_quiz(QuizRequest { topic: "Safety Basics", language: "en", skill_level: SkillLevel::Beginner, context: &context })
      .await;
    assert_eq!(qs.len(), 3);
    assert_eq!(qs[0].answer_key, "b");
    assert_eq!(qs[1].kind, QuestionKind::ShortAnswer);
  }

  #[tokio::test]
  async fn malformed_provider_quiz_falls_back() {
    let client = GenerationClient::new(vec![Scripted::ok("p", "Here are some questions: 1) ...") as Arc<dyn Provider>], Prompts::default());
    let qs = client
      .generate_quiz(QuizRequest { topic: "Welding", language: "en", skill_level: SkillLevel::Beginner, context: &[] })
      .await;
    assert_eq!(qs, fallback::quiz("Welding"));
  }

  #[test]
  fn quiz_validation_rejects_schema_violations() {
    // too few
    assert!(parse_quiz(r#"[{"prompt":"Which one?","type":"short_answer","answerKey":"x","explanation":"because"}]"#).is_err());
    // unknown type
    let bad_type = r#"[
      {"prompt":"Which one?","type":"essay","answerKey":"x","explanation":"because"},
      {"prompt":"Which one?","type":"short_answer","answerKey":"x","explanation":"because"},
      {"prompt":"Which one?","type":"short_answer","answerKey":"x","explanation":"because"}]"#;
    assert!(parse_quiz(bad_type).is_err());
    // multiple choice keyed by text instead of letter
    let text_key = r#"[
      {"prompt":"Which one?","type":"multiple_choice","options":["A) x","B) y"],"answerKey":"B) y","explanation":"because"},
      {"prompt":"Which one?","type":"short_answer","answerKey":"x","explanation":"because"},
      {"prompt":"Which one?","type":"short_answer","answerKey":"x","explanation":"because"}]"#;
    assert!(parse_quiz(text_key).is_err());
    // letter out of range
    let out_of_range = text_key.replace("\"B) y\"", "\"D\"");
    assert!(parse_quiz(&out_of_range).is_err());
  }

  #[test]
  fn short_answer_options_are_dropped() {
    let raw = r#"[
      {"prompt":"Name a hazard.","type":"short_answer","options":["ignored"],"answerKey":"pinch point","explanation":"Moving parts."},
      {"prompt":"Name a hazard.","type":"short_answer","answerKey":"noise","explanation":"Hearing loss."},
      {"prompt":"Name a hazard.","type":"short_answer","answerKey":"heat","explanation":"Burn risk."}]"#;
    let qs = parse_quiz(raw).expect("valid");
    assert!(qs.iter().all(|q| q.kind.options().is_none()));
  }

  #[test]
  fn code_fence_is_unwrapped() {
    assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
    assert_eq!(strip_code_fence("```JSON [2] ```"), "[2]");
    assert_eq!(strip_code_fence("```\n[3]\n```"), "[3]");
    assert_eq!(strip_code_fence("  [4] "), "[4]");
  }

  #[test]
  fn context_is_numbered_with_sources() {
    assert_eq!(context_text(&ctx()), "[1] (loto.md) Apply lockout tagout before maintenance.");
    assert_eq!(context_text(&[]), "");
  }
}
