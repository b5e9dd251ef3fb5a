//! Generative call adapter.
//!
//! [`GenerativeClient`] binds a backend to one stage's call settings. It makes
//! exactly one backend call per invocation, never retries, and bounds every call
//! with the configured timeout.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::audit::CallAudit;
use crate::backend::{GeminiBackend, LlmBackend, LlmError, LlmRequest, OpenAiCompatibleBackend};

// ── Backend construction ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gemini,
    OpenAiCompatible,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini"                                  => Ok(BackendKind::Gemini),
            "openai_compatible" | "openai" | "ollama" => Ok(BackendKind::OpenAiCompatible),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

pub struct BackendConfig {
    pub kind: BackendKind,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

pub fn build_backend(cfg: BackendConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    match cfg.kind {
        BackendKind::Gemini => {
            let key = cfg.api_key.ok_or_else(|| {
                LlmError::Unavailable("Gemini backend requires an API key".to_string())
            })?;
            let mut backend = GeminiBackend::new(key, cfg.model, cfg.timeout)?;
            if let Some(url) = cfg.base_url {
                backend = backend.with_base_url(url);
            }
            Ok(Arc::new(backend))
        }
        BackendKind::OpenAiCompatible => {
            let url = cfg.base_url.ok_or_else(|| {
                LlmError::Unavailable("OpenAI-compatible backend requires base_url".to_string())
            })?;
            Ok(Arc::new(OpenAiCompatibleBackend::new(url, cfg.model, cfg.api_key, cfg.timeout)?))
        }
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────────

/// Per-stage call parameters.
#[derive(Debug, Clone)]
pub struct CallSettings {
    /// Stage label used in logs and audit records.
    pub stage: &'static str,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GenerativeClient {
    backend: Arc<dyn LlmBackend>,
    settings: CallSettings,
}

impl GenerativeClient {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: CallSettings) -> Self {
        Self { backend, settings }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// Send one prompt and return the trimmed response text.
    ///
    /// Transport, API and timeout failures are all returned as `Err`; nothing
    /// here interprets provider error codes.
    pub async fn generate(&self, prompt: &str, schema: Option<&Value>) -> Result<String, LlmError> {
        let req = LlmRequest {
            prompt: prompt.to_string(),
            schema: schema.cloned(),
            max_tokens: Some(self.settings.max_output_tokens),
            temperature: Some(self.settings.temperature),
        };

        let started = Instant::now();
        let resp = tokio::time::timeout(self.settings.timeout, self.backend.complete(req))
            .await
            .map_err(|_| LlmError::Timeout(self.settings.timeout))??;

        CallAudit::new(
            self.settings.stage,
            &resp.model,
            self.backend.backend_name(),
            resp.prompt_tokens,
            resp.completion_tokens,
            &resp.content,
            started.elapsed().as_millis() as u64,
        )
        .log();

        Ok(resp.content.trim().to_string())
    }

    /// Token estimate for `text`, or `None` when the backend cannot tell.
    pub async fn estimate_tokens(&self, text: &str) -> Option<u64> {
        match tokio::time::timeout(self.settings.timeout, self.backend.count_tokens(text)).await {
            Ok(Ok(n)) => Some(n),
            Ok(Err(e)) => {
                debug!(stage = self.settings.stage, error = %e, "Token count unavailable");
                None
            }
            Err(_) => {
                debug!(stage = self.settings.stage, "Token count timed out");
                None
            }
        }
    }
}
