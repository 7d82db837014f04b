//! Minimal HTTP clients for the external text-generation services.
//!
//! Each provider turns one (system, prompt) pair into plain text. Calls are
//! instrumented and log model names, latencies and response sizes (not contents).
//!
//! NOTE: We never log API keys and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::{GeminiSettings, OpenAiSettings};
use crate::error::GenerationError;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);
const UA: &str = "sop-trainer-backend/0.1";

/// One external text-generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
  fn name(&self) -> &str;

  async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

fn non_empty(text: String) -> Result<String, GenerationError> {
  let t = text.trim();
  if t.is_empty() {
    Err(GenerationError::Empty)
  } else {
    Ok(t.to_string())
  }
}

// --- Gemini (generateContent) ---

pub struct GeminiProvider {
  client: reqwest::Client,
  api_key: String,
  model: String,
  base_url: String,
}

impl GeminiProvider {
  pub fn new(settings: &GeminiSettings) -> Result<Self, GenerationError> {
    let client = reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
    Ok(Self {
      client,
      api_key: settings.api_key.clone(),
      model: settings.model.clone(),
      base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
    })
  }
}

#[derive(Serialize)]
struct GeminiRequest {
  contents: Vec<GeminiContent>,
}
#[derive(Serialize, Deserialize)]
struct GeminiContent {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<GeminiPart>,
}
#[derive(Serialize, Deserialize)]
struct GeminiPart {
  #[serde(default)]
  text: String,
}
#[derive(Deserialize)]
struct GeminiResponse {
  #[serde(default)]
  candidates: Vec<GeminiCandidate>,
}
#[derive(Deserialize)]
struct GeminiCandidate {
  content: Option<GeminiContent>,
}

#[async_trait]
impl Provider for GeminiProvider {
  fn name(&self) -> &str {
    "gemini"
  }

  #[instrument(level = "info", skip(self, system, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
    // Gemini gets the system text folded into the single user turn.
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let req = GeminiRequest {
      contents: vec![GeminiContent {
        role: Some("user".into()),
        parts: vec![GeminiPart { text: format!("{}\n\n{}", system, prompt) }],
      }],
    };

    let start = Instant::now();
    let res = self
      .client
      .post(&url)
      .query(&[("key", self.api_key.as_str())])
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or(body);
      return Err(GenerationError::Http { status, message });
    }

    let body: GeminiResponse = res.json().await?;
    let text: String = body
      .candidates
      .into_iter()
      .next()
      .and_then(|c| c.content)
      .map(|c| c.parts.into_iter().map(|p| p.text).collect())
      .unwrap_or_default();
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Gemini response received");
    non_empty(text)
  }
}

// --- OpenAI-compatible chat.completions ---

#[derive(Clone)]
pub struct OpenAiProvider {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl OpenAiProvider {
  pub fn new(settings: &OpenAiSettings) -> Result<Self, GenerationError> {
    let client = reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
    Ok(Self {
      client,
      api_key: settings.api_key.clone(),
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      model: settings.model.clone(),
    })
  }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
}
#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

#[async_trait]
impl Provider for OpenAiProvider {
  fn name(&self) -> &str {
    "openai"
  }

  #[instrument(level = "info", skip(self, system, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: prompt.into() },
      ],
      temperature: 0.2,
    };

    let start = Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or(body);
      return Err(GenerationError::Http { status, message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "OpenAI response received");
    non_empty(text)
  }
}

/// Try to extract a clean error message from an `{"error": {"message": ...}}` body.
/// Both services use this shape.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_nested_error_message() {
    let body = r#"{"error":{"message":"quota exceeded","code":429}}"#;
    assert_eq!(extract_api_error(body).as_deref(), Some("quota exceeded"));
    assert_eq!(extract_api_error("<html>bad gateway</html>"), None);
  }

  #[test]
  fn blank_output_counts_as_failure() {
    assert!(matches!(non_empty("  \n ".into()), Err(GenerationError::Empty)));
    assert_eq!(non_empty(" ok ".into()).ok().as_deref(), Some("ok"));
  }

  #[test]
  fn gemini_response_shape_decodes() {
    let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Stop "},{"text":"the line."}]}}]}"#;
    let body: GeminiResponse = serde_json::from_str(raw).expect("decode");
    let text: String = body
      .candidates
      .into_iter()
      .next()
      .and_then(|c| c.content)
      .map(|c| c.parts.into_iter().map(|p| p.text).collect())
      .unwrap_or_default();
    assert_eq!(text, "Stop the line.");
  }
}
