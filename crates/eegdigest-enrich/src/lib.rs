//! eegdigest-enrich: classification and enrichment core.
//!
//! Structured model calls go through [`cascade::RepairCascade`]: a primary
//! attempt, one repair attempt, then a deterministic fallback. Nothing in this
//! crate lets a malformed model answer escape as an error.

pub mod cascade;
pub mod input_mode;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod summary;
pub mod triage;

pub use cascade::{Attempt, CascadeOutcome, RepairCascade, Stage, Tier};
pub use input_mode::{select_input_mode, InputMode, ModeSelection};
pub use pipeline::{select_for_enrichment, DigestEngine, Pipeline, PipelineSettings, RunOutput, RunStats};
pub use prompt::{PromptError, PromptSet};
pub use schema::{Schema, SchemaError, Violation};
pub use summary::{fallback_summary, SummaryOutcome, SummaryRequest};
pub use triage::fallback_classification;
