//! Chooses between full text and section slices for the summary prompt.
//!
//! Full text is sent only when it is non-empty, its rendered prompt can be
//! counted, and the count fits the budget. Every other path falls back to
//! slices and says why in the mode notes.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use eegdigest_common::{CandidateItem, ClassificationResult};
use eegdigest_ingestion::FulltextSlices;
use eegdigest_llm::GenerativeClient;

use crate::prompt::PromptSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Fulltext,
    FulltextSlices,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputMode::Fulltext       => "fulltext",
            InputMode::FulltextSlices => "fulltext_slices",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeSelection {
    pub mode: InputMode,
    /// Summary prompt input: base payload plus `fulltext` or `fulltext_slices`.
    pub payload: Value,
    pub notes: String,
    pub prompt_tokens: Option<u64>,
}

impl ModeSelection {
    pub fn used_fulltext(&self) -> bool {
        self.mode == InputMode::Fulltext
    }
}

/// Item metadata and its classification, shared by both input modes.
pub fn base_payload(item: &CandidateItem, triage: &ClassificationResult) -> Map<String, Value> {
    let mut base = Map::new();
    base.insert("arxiv_id_base".into(), json!(item.item_id));
    base.insert("title".into(), json!(item.title));
    base.insert("published_date".into(), json!(item.published_date()));
    base.insert("categories".into(), json!(item.categories));
    base.insert("abstract".into(), json!(item.abstract_text));
    base.insert(
        "triage".into(),
        json!({
            "decision": triage.decision.as_str(),
            "confidence": triage.confidence,
            "reasons": triage.reasons,
        }),
    );
    base
}

fn with_slices(mut base: Map<String, Value>, slices: &FulltextSlices) -> Value {
    base.insert("fulltext_slices".into(), json!(slices));
    Value::Object(base)
}

/// Append mode notes to caller notes with `;`.
pub fn merge_notes(notes: &str, mode_notes: &str) -> String {
    if notes.is_empty() {
        mode_notes.to_string()
    } else {
        format!("{notes};{mode_notes}")
    }
}

pub async fn select_input_mode(
    item: &CandidateItem,
    triage: &ClassificationResult,
    raw_fulltext: &str,
    slices: &FulltextSlices,
    prompts: &PromptSet,
    client: &GenerativeClient,
    max_input_tokens: u64,
) -> ModeSelection {
    let base = base_payload(item, triage);

    if raw_fulltext.trim().is_empty() {
        return ModeSelection {
            mode: InputMode::FulltextSlices,
            payload: with_slices(base, slices),
            notes: "input_mode=fulltext_slices;reason=missing_fulltext".to_string(),
            prompt_tokens: None,
        };
    }

    let mut full = base.clone();
    full.insert("fulltext".into(), json!(raw_fulltext));
    let full = Value::Object(full);

    let tokens = match prompts.summary(&full.to_string()) {
        Ok(prompt) => client.estimate_tokens(&prompt).await,
        Err(e) => {
            debug!(item_id = %item.item_id, error = %e, "Full-text prompt could not be rendered");
            None
        }
    };

    let selection = match tokens {
        Some(t) if t <= max_input_tokens => ModeSelection {
            mode: InputMode::Fulltext,
            payload: full,
            notes: format!("input_mode=fulltext;prompt_tokens={t}"),
            prompt_tokens: Some(t),
        },
        Some(t) => ModeSelection {
            mode: InputMode::FulltextSlices,
            payload: with_slices(base, slices),
            notes: format!(
                "input_mode=fulltext_slices;reason=fulltext_over_limit;prompt_tokens={t};max_tokens={max_input_tokens}"
            ),
            prompt_tokens: Some(t),
        },
        None => ModeSelection {
            mode: InputMode::FulltextSlices,
            payload: with_slices(base, slices),
            notes: "input_mode=fulltext_slices;reason=count_tokens_failed".to_string(),
            prompt_tokens: None,
        },
    };
    debug!(
        item_id = %item.item_id,
        mode = selection.mode.as_str(),
        prompt_tokens = ?selection.prompt_tokens,
        "Summary input mode selected"
    );
    selection
}
