//! Minimal OpenAI-compatible client for the flows.
//!
//! We only call chat.completions in JSON-object mode and hand the raw content
//! back to the caller for parsing. Calls are instrumented and log model names,
//! latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key.

use std::time::Instant;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, ModelConfig};
use crate::util::{strip_code_fence, trunc_for_log};

/// Upstream failures: transport, provider errors, or unusable output.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
  #[error("model request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("model HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("model returned an empty response")]
  Empty,
  #[error("model output is not valid JSON for this flow: {0}")]
  Parse(String),
}

/// Which configured model serves a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
  Fast,
  Strong,
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
}

impl OpenAI {
  pub fn new(cfg: &ModelConfig) -> Result<Self, ConfigError> {
    let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;
    Ok(Self {
      client,
      api_key: cfg.api_key.clone(),
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      fast_model: cfg.fast_model.clone(),
      strong_model: cfg.strong_model.clone(),
    })
  }

  pub fn model(&self, tier: Tier) -> &str {
    match tier {
      Tier::Fast => &self.fast_model,
      Tier::Strong => &self.strong_model,
    }
  }

  /// JSON-object chat completion. Returns the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model(tier), user_len = user.len()))]
  pub async fn chat_json_raw(
    &self,
    tier: Tier,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, ModelError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model(tier).to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "codegym-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      warn!(status = status.as_u16(), elapsed = ?start.elapsed(), "Model call rejected");
      return Err(ModelError::Http { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, elapsed = ?start.elapsed(), "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();
    if text.trim().is_empty() {
      return Err(ModelError::Empty);
    }
    debug!(content_len = text.len(), "Model content received");
    Ok(text)
  }

  /// JSON-object chat completion parsed into `T`.
  pub async fn chat_json<T: DeserializeOwned>(
    &self,
    tier: Tier,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, ModelError> {
    let text = self.chat_json_raw(tier, system, user, temperature).await?;
    parse_content(&text)
  }
}

/// Parse model content into `T`, tolerating a surrounding code fence.
pub fn parse_content<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
  serde_json::from_str::<T>(strip_code_fence(text)).map_err(|e| ModelError::Parse(e.to_string()))
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
