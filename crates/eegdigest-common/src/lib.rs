//! eegdigest-common: Shared types, errors, and traits used across all eegdigest crates.

pub mod error;
pub mod models;
pub mod cache;

// Re-export commonly used types
pub use error::{DigestError, Result};
pub use models::{
    CandidateItem, ClassificationResult, Decision, DigestRecord, ItemState, PaperLinks,
    PaperSummary, TextDiagnostic,
};
pub use cache::{cache_decision, CacheDecision, CacheKind, MemoryCache, ResultCache};
