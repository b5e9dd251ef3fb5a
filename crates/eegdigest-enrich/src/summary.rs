//! Enrichment stage: structured summary of an accepted paper.

use serde_json::{json, Value};

use eegdigest_common::models::{DataScale, Evaluation, MethodInfo, OpenSource};
use eegdigest_common::{CandidateItem, ClassificationResult, PaperSummary};
use eegdigest_ingestion::FulltextSlices;
use eegdigest_llm::GenerativeClient;

use crate::cascade::{CascadeOutcome, RepairCascade, Stage};
use crate::input_mode::{merge_notes, select_input_mode, ModeSelection};
use crate::prompt::PromptSet;
use crate::schema::Schema;

pub const FALLBACK_ONE_LINER: &str = "Summary unavailable due to JSON validation failure.";

pub struct SummaryStage<'a> {
    schema: &'a Schema,
    item: &'a CandidateItem,
    used_fulltext: bool,
    notes: String,
}

impl<'a> SummaryStage<'a> {
    pub fn new(schema: &'a Schema, item: &'a CandidateItem, used_fulltext: bool, notes: String) -> Self {
        Self { schema, item, used_fulltext, notes }
    }
}

impl Stage for SummaryStage<'_> {
    type Output = PaperSummary;

    fn name(&self) -> &'static str {
        "summary"
    }

    fn schema(&self) -> &Schema {
        self.schema
    }

    fn prepare(&self, value: &mut Value) {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("used_fulltext".into(), json!(self.used_fulltext));
            obj.insert("notes".into(), json!(self.notes));
        }
    }

    fn finish(&self, value: Value) -> Result<PaperSummary, String> {
        serde_json::from_value(value).map_err(|e| format!("summary shape: {e}"))
    }

    fn fallback(&self) -> PaperSummary {
        fallback_summary(self.item, self.used_fulltext, &self.notes)
    }
}

pub fn fallback_summary(item: &CandidateItem, used_fulltext: bool, notes: &str) -> PaperSummary {
    let unknown = || "unknown".to_string();
    PaperSummary {
        item_id: item.item_id.clone(),
        title: item.title.clone(),
        published_date: item.published_date(),
        categories: item.categories.clone(),
        paper_type: "other".to_string(),
        one_liner: FALLBACK_ONE_LINER.to_string(),
        unique_contribution: unknown(),
        key_points: vec![unknown(), unknown(), unknown()],
        data_scale: DataScale::default(),
        method: MethodInfo::default(),
        evaluation: Evaluation::default(),
        open_source: OpenSource::default(),
        limitations: vec![unknown(), "summary_json_error".to_string()],
        used_fulltext,
        notes: format!("{notes};summary_json_error"),
    }
}

/// Inputs for summarizing one item.
pub struct SummaryRequest<'a> {
    pub item: &'a CandidateItem,
    pub triage: &'a ClassificationResult,
    pub raw_fulltext: &'a str,
    pub slices: &'a FulltextSlices,
    /// Caller notes, e.g. the text extraction diagnostic.
    pub notes: &'a str,
    pub max_input_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub outcome: CascadeOutcome<PaperSummary>,
    pub selection: ModeSelection,
}

/// Select the input mode, then run the cascade. Always yields a summary.
pub async fn summarize(
    cascade: &RepairCascade<'_>,
    prompts: &PromptSet,
    schema: &Schema,
    client: &GenerativeClient,
    req: SummaryRequest<'_>,
) -> SummaryOutcome {
    let selection = select_input_mode(
        req.item,
        req.triage,
        req.raw_fulltext,
        req.slices,
        prompts,
        client,
        req.max_input_tokens,
    )
    .await;

    let stage = SummaryStage::new(
        schema,
        req.item,
        selection.used_fulltext(),
        merge_notes(req.notes, &selection.notes),
    );
    let outcome = match prompts.summary(&selection.payload.to_string()) {
        Ok(prompt) => cascade.run(&stage, &req.item.item_id, &prompt).await,
        Err(e) => RepairCascade::fallback_only(&stage, &req.item.item_id, e.to_string()),
    };
    SummaryOutcome { outcome, selection }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use eegdigest_common::PaperLinks;
    use pretty_assertions::assert_eq;

    fn item() -> CandidateItem {
        let ts = Utc.with_ymd_and_hms(2025, 1, 7, 9, 0, 0).unwrap();
        CandidateItem {
            item_id: "2501.00042".to_string(),
            arxiv_id: "2501.00042v1".to_string(),
            version: 1,
            title: "BrainBERT-2".to_string(),
            abstract_text: "abs".to_string(),
            authors: vec![],
            categories: vec!["cs.LG".to_string(), "eess.SP".to_string()],
            published: ts,
            updated: ts,
            links: PaperLinks::default(),
        }
    }

    #[test]
    fn test_fallback_summary_shape() {
        let fb = fallback_summary(&item(), true, "text_tool=pdf-extract;input_mode=fulltext;prompt_tokens=10");
        assert_eq!(
            serde_json::to_value(&fb).unwrap(),
            json!({
                "arxiv_id_base": "2501.00042",
                "title": "BrainBERT-2",
                "published_date": "2025-01-07",
                "categories": ["cs.LG", "eess.SP"],
                "paper_type": "other",
                "one_liner": "Summary unavailable due to JSON validation failure.",
                "unique_contribution": "unknown",
                "key_points": ["unknown", "unknown", "unknown"],
                "data_scale": {"datasets": [], "subjects": null, "eeg_hours": null, "channels": null},
                "method": {"architecture": null, "objective": null, "pretraining": null, "finetuning": null},
                "evaluation": {"tasks": [], "benchmarks": [], "headline_results": []},
                "open_source": {"code_url": null, "weights_url": null, "license": null},
                "limitations": ["unknown", "summary_json_error"],
                "used_fulltext": true,
                "notes": "text_tool=pdf-extract;input_mode=fulltext;prompt_tokens=10;summary_json_error"
            })
        );
    }

    #[test]
    fn test_prepare_overrides_model_supplied_flags() {
        let schema = Schema::compile(json!({"type": "object"})).unwrap();
        let it = item();
        let stage = SummaryStage::new(&schema, &it, false, "n".to_string());
        let mut v = json!({"used_fulltext": true, "notes": "model notes"});
        stage.prepare(&mut v);
        assert_eq!(v["used_fulltext"], json!(false));
        assert_eq!(v["notes"], json!("n"));
    }
}
