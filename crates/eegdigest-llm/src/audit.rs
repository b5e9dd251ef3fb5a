//! Audit records for generative calls.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAudit {
    pub id: Uuid,
    pub stage: String,
    pub model: String,
    pub backend: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub output_hash: String,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl CallAudit {
    pub fn new(
        stage: &str,
        model: &str,
        backend: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        output: &str,
        latency_ms: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(output.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            stage: stage.to_string(),
            model: model.to_string(),
            backend: backend.to_string(),
            prompt_tokens,
            completion_tokens,
            output_hash,
            latency_ms,
            called_at: Utc::now(),
        }
    }

    pub fn log(&self) {
        tracing::debug!(
            call_id = %self.id,
            stage = %self.stage,
            model = %self.model,
            backend = %self.backend,
            prompt_tokens = self.prompt_tokens,
            completion_tokens = self.completion_tokens,
            output_hash = %self.output_hash,
            latency_ms = self.latency_ms,
            "LLM call completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_output_same_hash() {
        let a = CallAudit::new("triage", "m", "gemini", 1, 2, "{}", 10);
        let b = CallAudit::new("triage", "m", "gemini", 1, 2, "{}", 12);
        assert_eq!(a.output_hash, b.output_hash);
        assert_ne!(a.id, b.id);
        assert_eq!(a.output_hash.len(), 64);
    }
}
