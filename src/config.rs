//! Process settings (environment) plus an optional TOML overlay carrying
//! prompts, tuning constants and a seed corpus.
//!
//! See `TrainerConfig`, `Prompts` and `Tuning` for the expected TOML schema.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::domain::Chunk;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TrainerConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub tuning: Tuning,
  #[serde(default)]
  pub documents: Vec<DocumentCfg>,
}

/// Seed chunk accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct DocumentCfg {
  pub id: String,
  pub text: String,
  pub module: String,
  #[serde(default)]
  pub source: Option<String>,
}

impl DocumentCfg {
  pub fn to_chunk(&self) -> Chunk {
    Chunk {
      id: self.id.clone(),
      text: self.text.clone(),
      module: self.module.clone(),
      source: self.source.clone().unwrap_or_else(|| "config".into()),
      metadata: Map::<String, Value>::new(),
    }
  }
}

/// Prompt templates used by the generation client. `{placeholder}` values are
/// filled per request; the defaults target SME factory training.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub assistance_system: String,
  pub assistance_user_template: String,
  pub quiz_system: String,
  pub quiz_user_template: String,
  pub explain_system: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      assistance_system: "You are a manufacturing training assistant for SME factory workers. Respond in language code: {language}. {skill_guide} Provide actionable guidance first, then a short reason section prefixed with \"Why:\". If the context is insufficient, say what is missing and still provide a safe next step.".into(),
      assistance_user_template: "Module: {module}\n\nWorker question: {question}\n\nRetrieved training context:\n\n{context}\n\nAnswer with 2-5 concise bullet points plus one brief \"Why:\" paragraph.".into(),
      quiz_system: "You generate structured factory-training quizzes. Respond in language code: {language}. {skill_guide} Output only valid JSON with an array of 3 to 5 questions. Each question must include prompt, type, options(optional for short answers), answerKey, explanation. Use \"multiple_choice\" or \"short_answer\" values for type.".into(),
      quiz_user_template: "Topic: {topic}\n\nRetrieved context:\n\n{context}\n\nGenerate questions that test procedural understanding and safety judgment.\n\nFor multiple choice, answerKey should be the option letter (A/B/C/D).".into(),
      explain_system: "You provide transparent reasoning for manufacturing training answers. Respond in language code: {language}. Be concise, factual, and grounded in provided context.".into(),
    }
  }
}

/// Heuristic constants. The defaults are the values the product shipped with.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tuning {
  /// Fraction of expected short-answer tokens that must appear in the submission.
  pub short_answer_threshold: f64,
  pub advanced_threshold: u32,
  pub intermediate_threshold: u32,
  /// Minimum attempt score that marks a module completed.
  pub module_pass_score: u32,
  pub min_chat_seconds: u64,
  pub default_chat_seconds: u64,
  pub min_quiz_seconds: u64,
  pub default_quiz_seconds: u64,
  pub token_delay_ms: u64,
  pub chat_top_k: usize,
  pub quiz_top_k: usize,
  pub default_module: String,
}

impl Default for Tuning {
  fn default() -> Self {
    Self {
      short_answer_threshold: 0.6,
      advanced_threshold: 85,
      intermediate_threshold: 60,
      module_pass_score: 70,
      min_chat_seconds: 5,
      default_chat_seconds: 15,
      min_quiz_seconds: 10,
      default_quiz_seconds: 20,
      token_delay_ms: 20,
      chat_top_k: 4,
      quiz_top_k: 5,
      default_module: "General Onboarding".into(),
    }
  }
}

#[derive(Clone, Debug)]
pub struct GeminiSettings {
  pub api_key: String,
  pub model: String,
}

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

#[derive(Clone, Debug)]
pub struct RemoteIndexSettings {
  pub url: String,
  pub collection: String,
}

/// Everything the process needs at start-up.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub gemini: Option<GeminiSettings>,
  pub openai: Option<OpenAiSettings>,
  pub remote_index: Option<RemoteIndexSettings>,
  pub remote_timeout: Duration,
  pub shutdown_timeout: Duration,
  pub prompts: Prompts,
  pub tuning: Tuning,
  pub documents: Vec<DocumentCfg>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      port: 4000,
      gemini: None,
      openai: None,
      remote_index: None,
      remote_timeout: Duration::from_millis(3000),
      shutdown_timeout: Duration::from_millis(15000),
      prompts: Prompts::default(),
      tuning: Tuning::default(),
      documents: Vec::new(),
    }
  }
}

impl Settings {
  /// Build settings from environment variables and the optional TOML file at
  /// TRAINER_CONFIG_PATH. Invalid numeric values fall back to defaults.
  pub fn from_env() -> Self {
    let mut s = Settings::default();

    if let Some(port) = env_parse::<u16>("PORT") {
      s.port = port;
    }
    if let Some(ms) = env_parse::<u64>("REMOTE_TIMEOUT_MS") {
      s.remote_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("SHUTDOWN_TIMEOUT_MS") {
      s.shutdown_timeout = Duration::from_millis(ms);
    }

    s.gemini = env_non_empty("GEMINI_API_KEY").map(|api_key| GeminiSettings {
      api_key,
      model: env_non_empty("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".into()),
    });
    s.openai = env_non_empty("OPENAI_API_KEY").map(|api_key| OpenAiSettings {
      api_key,
      base_url: env_non_empty("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
      model: env_non_empty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
    });
    s.remote_index = env_non_empty("CHROMA_URL").map(|url| RemoteIndexSettings {
      url: url.trim_end_matches('/').to_string(),
      collection: env_non_empty("CHROMA_COLLECTION").unwrap_or_else(|| "training_documents".into()),
    });

    if let Some(cfg) = load_trainer_config_from_env() {
      s.prompts = cfg.prompts;
      s.tuning = cfg.tuning;
      s.documents = cfg.documents;
    }
    s
  }
}

fn env_non_empty(key: &str) -> Option<String> {
  std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  env_non_empty(key).and_then(|v| v.parse::<T>().ok())
}

/// Attempt to load `TrainerConfig` from TRAINER_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_trainer_config_from_env() -> Option<TrainerConfig> {
  let path = std::env::var("TRAINER_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_trainer_config(&s) {
      Ok(cfg) => {
        info!(target: "sop_trainer", %path, documents = cfg.documents.len(), "Loaded trainer config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "sop_trainer", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "sop_trainer", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_trainer_config(raw: &str) -> Result<TrainerConfig, toml::de::Error> {
  toml::from_str::<TrainerConfig>(raw)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let raw = r#"
      [tuning]
      short_answer_threshold = 0.75
      token_delay_ms = 0

      [[documents]]
      id = "loto-1"
      text = "Apply lockout tagout before servicing."
      module = "Safety Basics"
    "#;
    let cfg = parse_trainer_config(raw).expect("valid toml");
    assert_eq!(cfg.tuning.short_answer_threshold, 0.75);
    assert_eq!(cfg.tuning.token_delay_ms, 0);
    assert_eq!(cfg.tuning.advanced_threshold, 85);
    assert_eq!(cfg.tuning.default_module, "General Onboarding");
    assert!(cfg.prompts.assistance_system.contains("{language}"));

    let chunk = cfg.documents[0].to_chunk();
    assert_eq!(chunk.source, "config");
    assert_eq!(chunk.module, "Safety Basics");
  }

  #[test]
  fn invalid_toml_is_an_error() {
    assert!(parse_trainer_config("[tuning\nbroken").is_err());
  }
}
