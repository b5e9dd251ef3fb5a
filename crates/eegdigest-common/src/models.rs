//! Domain models shared by ingestion, enrichment, storage and artifact output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Candidate items ──────────────────────────────────────────────────────────

/// A paper discovered by the search API. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Version-less arXiv identifier, e.g. `2401.01234`.
    #[serde(rename = "arxiv_id_base")]
    pub item_id: String,
    /// Full identifier including the version suffix, e.g. `2401.01234v2`.
    pub arxiv_id: String,
    pub version: u32,
    pub title: String,
    #[serde(rename = "summary")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub links: PaperLinks,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaperLinks {
    /// Abstract page URL.
    pub abs: String,
    /// PDF URL, empty when the feed did not carry one.
    #[serde(default)]
    pub pdf: String,
}

impl CandidateItem {
    /// Publication date as `YYYY-MM-DD`.
    pub fn published_date(&self) -> String {
        self.published.format("%Y-%m-%d").to_string()
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
    Borderline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept     => "accept",
            Decision::Reject     => "reject",
            Decision::Borderline => "borderline",
        }
    }
}

/// Triage outcome for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "arxiv_id_base")]
    pub item_id: String,
    pub decision: Decision,
    pub confidence: f64,
    #[serde(default, deserialize_with = "reasons_list")]
    pub reasons: Vec<String>,
}

fn reasons_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(coerce_reasons(value.unwrap_or(Value::Null)))
}

/// Coerce whatever the model (or an old cache row) put under `reasons` into a
/// list of strings. A scalar becomes a one-element list.
pub fn coerce_reasons(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

// ── Enrichment ───────────────────────────────────────────────────────────────

/// Structured per-paper summary produced for accepted items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    #[serde(rename = "arxiv_id_base")]
    pub item_id: String,
    pub title: String,
    pub published_date: String,
    pub categories: Vec<String>,
    pub paper_type: String,
    pub one_liner: String,
    pub unique_contribution: String,
    pub key_points: Vec<String>,
    pub data_scale: DataScale,
    pub method: MethodInfo,
    pub evaluation: Evaluation,
    pub open_source: OpenSource,
    pub limitations: Vec<String>,
    pub used_fulltext: bool,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataScale {
    pub datasets: Vec<String>,
    pub subjects: Option<String>,
    pub eeg_hours: Option<String>,
    pub channels: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodInfo {
    pub architecture: Option<String>,
    pub objective: Option<String>,
    pub pretraining: Option<String>,
    pub finetuning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub tasks: Vec<String>,
    pub benchmarks: Vec<String>,
    pub headline_results: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpenSource {
    pub code_url: Option<String>,
    pub weights_url: Option<String>,
    pub license: Option<String>,
}

// ── Text resolution ──────────────────────────────────────────────────────────

/// Which extraction path produced the document text, and what went wrong on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDiagnostic {
    pub tool: String,
    pub pages: Option<usize>,
    pub chars: usize,
    pub error: Option<String>,
}

impl TextDiagnostic {
    /// Notes prefix handed to the summary stage.
    pub fn as_notes(&self) -> String {
        match &self.error {
            Some(e) => format!("text_tool={};text_error={}", self.tool, e),
            None => format!("text_tool={}", self.tool),
        }
    }
}

// ── Merged per-item view ─────────────────────────────────────────────────────

/// Terminal state of an item after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Rejected,
    /// Classified accept/borderline but cut by the selection caps.
    NotSelected,
    AcceptedUnsummarized,
    AcceptedSummarized,
}

/// Candidate metadata joined with its classification, enrichment and text diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestRecord {
    pub paper: CandidateItem,
    pub triage: ClassificationResult,
    pub summary: Option<PaperSummary>,
    pub text: Option<TextDiagnostic>,
    pub state: ItemState,
    pub skip_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reasons_scalar_becomes_list() {
        let raw = serde_json::json!({
            "arxiv_id_base": "2401.00001",
            "decision": "accept",
            "confidence": 0.9,
            "reasons": "pretrained on many EEG datasets"
        });
        let parsed: ClassificationResult = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.reasons, vec!["pretrained on many EEG datasets".to_string()]);
    }

    #[test]
    fn test_reasons_missing_is_empty_list() {
        let raw = serde_json::json!({
            "arxiv_id_base": "2401.00001",
            "decision": "reject",
            "confidence": 0.1
        });
        let parsed: ClassificationResult = serde_json::from_value(raw).unwrap();
        assert!(parsed.reasons.is_empty());
    }

    #[test]
    fn test_coerce_reasons_stringifies_non_strings() {
        let reasons = coerce_reasons(serde_json::json!(["a", 3, true]));
        assert_eq!(reasons, vec!["a", "3", "true"]);
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Decision::Borderline).unwrap(), "\"borderline\"");
        assert_eq!(Decision::Accept.as_str(), "accept");
    }

    #[test]
    fn test_text_diagnostic_notes() {
        let d = TextDiagnostic { tool: "lopdf".into(), pages: Some(3), chars: 10, error: Some("pdf_extract_failed:bad xref".into()) };
        assert_eq!(d.as_notes(), "text_tool=lopdf;text_error=pdf_extract_failed:bad xref");
    }
}
