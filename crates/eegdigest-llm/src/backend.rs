//! LLM backend trait and concrete implementations.
//!
//! Backends:
//!   GeminiBackend            Google Gemini API (generateContent / countTokens)
//!   OpenAiCompatibleBackend  any OpenAI-compatible endpoint (OpenAI, Ollama,
//!                            vLLM, LMStudio, OpenRouter, …)
//!
//! Response bodies differ by provider and by which fields the provider chose to
//! fill in, so text is pulled out through an ordered list of extractors rather
//! than by probing the shape at every call site.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("Token count missing from response")]
    MissingTokenCount,
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    /// JSON schema the response must follow; requests JSON output when set.
    pub schema: Option<Value>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    /// Number of prompt tokens `text` would consume with this backend's model.
    async fn count_tokens(&self, text: &str) -> Result<u64, LlmError>;
    fn model_id(&self) -> &str;
    fn backend_name(&self) -> &'static str;
}

// ── Response text extraction ─────────────────────────────────────────────────

/// One strategy for pulling generated text out of a raw response body.
pub type TextExtractor = fn(&Value) -> Option<String>;

pub const GEMINI_EXTRACTORS: &[TextExtractor] = &[top_level_text, candidate_parts_text];
pub const OPENAI_EXTRACTORS: &[TextExtractor] = &[choice_message_content, choice_text, top_level_text];

/// Try each extractor in order; the raw body rendered as a string is the last resort.
pub fn extract_text(body: &Value, extractors: &[TextExtractor]) -> String {
    extractors
        .iter()
        .find_map(|extract| extract(body))
        .unwrap_or_else(|| body.to_string())
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn top_level_text(body: &Value) -> Option<String> {
    body["text"].as_str().and_then(non_empty)
}

fn candidate_parts_text(body: &Value) -> Option<String> {
    let candidates = body["candidates"].as_array()?;
    let parts: Vec<&str> = candidates
        .iter()
        .filter_map(|c| c["content"]["parts"].as_array())
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() { None } else { Some(parts.join("\n")) }
}

fn choice_message_content(body: &Value) -> Option<String> {
    body["choices"][0]["message"]["content"].as_str().and_then(non_empty)
}

fn choice_text(body: &Value) -> Option<String> {
    body["choices"][0]["text"].as_str().and_then(non_empty)
}

const TOKEN_COUNT_KEYS: &[&str] = &["totalTokens", "total_tokens", "token_count", "total_token_count"];

/// Read a token count from the first key that is present.
pub fn read_token_count(body: &Value) -> Option<u64> {
    TOKEN_COUNT_KEYS.iter().find_map(|k| body[*k].as_u64())
}

async fn check_response_status(resp: reqwest::Response) -> Result<Value, LlmError> {
    let status = resp.status().as_u16();
    let body: Value = resp.json().await?;
    if status >= 400 {
        let msg = body["error"]["message"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or("unknown API error")
            .to_string();
        return Err(LlmError::ApiError { status, message: msg });
    }
    Ok(body)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("eegdigest/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

// ── 1. Google Gemini ──────────────────────────────────────────────────────────

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    pub model: String,
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            client: http_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url.trim_end_matches('/'), self.model, method)
    }
}

/// Build a `generateContent` body. The schema, when present, switches the
/// response to schema-constrained JSON.
pub fn gemini_request_body(req: &LlmRequest) -> Value {
    let mut generation_config = serde_json::json!({
        "maxOutputTokens": req.max_tokens.unwrap_or(2048),
        "temperature":     req.temperature.unwrap_or(0.2),
    });
    if let Some(schema) = &req.schema {
        generation_config["responseMimeType"] = Value::String("application/json".to_string());
        generation_config["responseJsonSchema"] = schema.clone();
    }
    serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": req.prompt }] }],
        "generationConfig": generation_config,
    })
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = gemini_request_body(&req);
        let resp = self.client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: extract_text(&json, GEMINI_EXTRACTORS),
            model: json["modelVersion"].as_str().unwrap_or(&self.model).to_string(),
            prompt_tokens:     json["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        })
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, LlmError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
        });
        let resp = self.client
            .post(self.endpoint("countTokens"))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;
        read_token_count(&json).ok_or(LlmError::MissingTokenCount)
    }

    fn model_id(&self) -> &str { &self.model }
    fn backend_name(&self) -> &'static str { "gemini" }
}

// ── 2. OpenAI-Compatible (OpenAI, Ollama, vLLM, LMStudio, OpenRouter, …) ─────

pub struct OpenAiCompatibleBackend {
    pub base_url: String,
    pub model: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client: http_client(timeout)?,
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => req.bearer_auth(k.expose_secret()),
            None    => req,
        }
    }
}

pub fn openai_request_body(model: &str, req: &LlmRequest) -> Value {
    let mut body = serde_json::json!({
        "model":       model,
        "messages":    [{ "role": "user", "content": req.prompt }],
        "max_tokens":  req.max_tokens.unwrap_or(2048),
        "temperature": req.temperature.unwrap_or(0.2),
    });
    if let Some(schema) = &req.schema {
        body["response_format"] = serde_json::json!({
            "type": "json_schema",
            "json_schema": { "name": "response", "schema": schema, "strict": false },
        });
    }
    body
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = openai_request_body(&self.model, &req);
        let resp = self.auth(self.client.post(&url)).json(&body).send().await?;
        let json = check_response_status(resp).await?;

        Ok(LlmResponse {
            content: extract_text(&json, OPENAI_EXTRACTORS),
            model: json["model"].as_str().unwrap_or(&self.model).to_string(),
            prompt_tokens:     json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        })
    }

    /// The chat-completions protocol has no token counting endpoint.
    async fn count_tokens(&self, _text: &str) -> Result<u64, LlmError> {
        Err(LlmError::Unsupported("count_tokens"))
    }

    fn model_id(&self) -> &str { &self.model }
    fn backend_name(&self) -> &'static str { "openai_compatible" }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("AIza-test".to_string())
    }

    #[test]
    fn test_extract_prefers_top_level_text() {
        let body = serde_json::json!({
            "text": "{\"a\":1}",
            "candidates": [{ "content": { "parts": [{ "text": "ignored" }] } }]
        });
        assert_eq!(extract_text(&body, GEMINI_EXTRACTORS), "{\"a\":1}");
    }

    #[test]
    fn test_extract_joins_candidate_parts() {
        let body = serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "{\"decision\":" }, { "text": "" }] } },
                { "content": { "parts": [{ "text": "\"accept\"}" }] } }
            ]
        });
        assert_eq!(extract_text(&body, GEMINI_EXTRACTORS), "{\"decision\":\n\"accept\"}");
    }

    #[test]
    fn test_extract_falls_back_to_raw_string() {
        let body = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let text = extract_text(&body, GEMINI_EXTRACTORS);
        assert!(text.contains("blockReason"));
    }

    #[test]
    fn test_extract_openai_message_content() {
        let body = serde_json::json!({ "choices": [{ "message": { "content": "hello" } }] });
        assert_eq!(extract_text(&body, OPENAI_EXTRACTORS), "hello");
    }

    #[test]
    fn test_read_token_count_key_priority() {
        assert_eq!(read_token_count(&serde_json::json!({ "totalTokens": 42 })), Some(42));
        assert_eq!(read_token_count(&serde_json::json!({ "total_token_count": 7 })), Some(7));
        assert_eq!(read_token_count(&serde_json::json!({ "tokens": 7 })), None);
    }

    #[test]
    fn test_gemini_body_requests_json_when_schema_given() {
        let req = LlmRequest {
            prompt: "classify".to_string(),
            schema: Some(serde_json::json!({ "type": "object" })),
            max_tokens: Some(1024),
            temperature: Some(0.2),
        };
        let body = gemini_request_body(&req);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "classify");
    }

    #[test]
    fn test_gemini_body_plain_text_without_schema() {
        let req = LlmRequest { prompt: "hi".to_string(), schema: None, max_tokens: None, temperature: None };
        let body = gemini_request_body(&req);
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_openai_body_carries_schema() {
        let req = LlmRequest {
            prompt: "p".to_string(),
            schema: Some(serde_json::json!({ "type": "object" })),
            max_tokens: None,
            temperature: None,
        };
        let body = openai_request_body("llama3:8b", &req);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["model"], "llama3:8b");
    }

    #[test]
    fn test_gemini_backend_identity() {
        let b = GeminiBackend::new(key(), "gemini-2.5-flash", Duration::from_secs(5)).unwrap();
        assert_eq!(b.model_id(), "gemini-2.5-flash");
        assert_eq!(b.backend_name(), "gemini");
        assert!(b.endpoint("countTokens").ends_with("/models/gemini-2.5-flash:countTokens"));
    }

    #[test]
    fn test_openai_compatible_cannot_count_tokens() {
        let b = OpenAiCompatibleBackend::new("http://localhost:11434", "llama3:8b", None, Duration::from_secs(5)).unwrap();
        let res = tokio_test::block_on(b.count_tokens("hello"));
        assert!(matches!(res, Err(LlmError::Unsupported(_))));
    }
}
