//! Minimal OpenAI-compatible client used as the verdict/hint endpoint.
//!
//! We only call chat.completions with a JSON-object response format and hand the
//! decoded object back to `VerdictService`, which owns the shape checks.
//! Calls log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key or the learner's code.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::config::{Prompts, ReasoningConfig};
use crate::error::VerdictError;
use crate::util::{fill_template, trunc_for_log};
use crate::verdict::{HintRequest, VerdictEndpoint, VerdictRequest};

#[derive(Clone)]
pub struct ReasoningClient {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
  verdict_temperature: f32,
  hint_temperature: f32,
  prompts: Prompts,
}

impl ReasoningClient {
  /// Construct the client if an API key is configured; otherwise return None.
  pub fn from_config(cfg: &ReasoningConfig, prompts: &Prompts) -> Option<Self> {
    let api_key = cfg.api_key.clone()?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.request_timeout_secs))
      .build()
      .map_err(|e| error!(target: "verdict", error = %e, "HTTP client build failed"))
      .ok()?;

    Some(Self {
      client,
      api_key,
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      model: cfg.model.clone(),
      verdict_temperature: cfg.verdict_temperature,
      hint_temperature: cfg.hint_temperature,
      prompts: prompts.clone(),
    })
  }

  /// JSON-object chat completion returning the raw decoded object.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> Result<Value, VerdictError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "athar-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| VerdictError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      error!(target: "verdict", status, elapsed = ?start.elapsed(), "Reasoning endpoint returned an error");
      return Err(VerdictError::Status { status, message });
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| VerdictError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "verdict", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, "Reasoning usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    info!(target: "verdict", elapsed = ?start.elapsed(), response_len = text.len(), "Reasoning response received");

    parse_json_content(&text)
  }
}

#[async_trait]
impl VerdictEndpoint for ReasoningClient {
  async fn judge(&self, request: &VerdictRequest) -> Result<Value, VerdictError> {
    let user = verdict_prompt(&self.prompts, request);
    self.chat_json(&self.prompts.verdict_system, &user, self.verdict_temperature).await
  }

  async fn hint(&self, request: &HintRequest) -> Result<Value, VerdictError> {
    let user = hint_prompt(&self.prompts, request);
    self.chat_json(&self.prompts.hint_system, &user, self.hint_temperature).await
  }

  fn describe(&self) -> String {
    format!("{} @ {}", self.model, self.base_url)
  }
}

// --- Prompt assembly ---

fn verdict_prompt(prompts: &Prompts, req: &VerdictRequest) -> String {
  let expected = req.expected_output.as_deref()
    .filter(|s| !s.is_empty())
    .map(|s| format!("Reference output example: {s} (the student's output may vary slightly in format)\n"))
    .unwrap_or_default();
  let starter = req.starter_code.as_deref()
    .map(|s| format!("Starter code provided:\n```python\n{s}\n```\n"))
    .unwrap_or_default();
  fill_template(&prompts.verdict_user_template, &[
    ("problem_en", &req.problem_statement_en),
    ("problem_ar", &req.problem_statement_ar),
    ("expected_output", &expected),
    ("starter_code", &starter),
    ("code", &req.code),
  ])
}

fn hint_prompt(prompts: &Prompts, req: &HintRequest) -> String {
  match req.current_code.as_deref() {
    Some(code) => fill_template(&prompts.hint_user_template_with_code, &[
      ("problem_en", &req.problem_statement_en),
      ("code", code),
    ]),
    None => fill_template(&prompts.hint_user_template, &[("problem_en", &req.problem_statement_en)]),
  }
}

/// Models sometimes wrap the object in a ```json fence despite the response format.
fn parse_json_content(text: &str) -> Result<Value, VerdictError> {
  let trimmed = text.trim();
  let inner = trimmed
    .strip_prefix("```json")
    .or_else(|| trimmed.strip_prefix("```"))
    .and_then(|s| s.trim_end().strip_suffix("```"))
    .unwrap_or(trimmed)
    .trim();
  let value: Value = serde_json::from_str(inner)
    .map_err(|e| VerdictError::Malformed(format!("JSON parse error: {e}")))?;
  if value.is_object() {
    Ok(value)
  } else {
    Err(VerdictError::Malformed("response is not a JSON object".into()))
  }
}

// --- OpenAI wire types ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
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
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
