//! eegdigest-llm: Generative model backend abstraction.
//!
//! One trait ([`backend::LlmBackend`]) with a Gemini and an OpenAI-compatible
//! implementation, wrapped by [`client::GenerativeClient`], which adds per-stage
//! settings, timeouts and the "unknown instead of error" token estimate.

pub mod backend;
pub mod client;
pub mod audit;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse};
pub use client::{build_backend, BackendConfig, BackendKind, CallSettings, GenerativeClient};
