//! Classification stage: accept / reject / borderline from title and abstract.

use serde_json::Value;

use eegdigest_common::models::coerce_reasons;
use eegdigest_common::{CandidateItem, ClassificationResult, Decision};

use crate::cascade::{CascadeOutcome, RepairCascade, Stage};
use crate::prompt::PromptSet;
use crate::schema::Schema;

pub const FALLBACK_REASONS: [&str; 2] = ["triage_json_error", "insufficient_valid_output"];

pub struct TriageStage<'a> {
    schema: &'a Schema,
    item_id: &'a str,
}

impl<'a> TriageStage<'a> {
    pub fn new(schema: &'a Schema, item_id: &'a str) -> Self {
        Self { schema, item_id }
    }
}

impl Stage for TriageStage<'_> {
    type Output = ClassificationResult;

    fn name(&self) -> &'static str {
        "triage"
    }

    fn schema(&self) -> &Schema {
        self.schema
    }

    fn prepare(&self, value: &mut Value) {
        if let Some(obj) = value.as_object_mut() {
            if let Some(reasons) = obj.remove("reasons") {
                obj.insert("reasons".to_string(), Value::from(coerce_reasons(reasons)));
            }
        }
    }

    fn finish(&self, value: Value) -> Result<ClassificationResult, String> {
        let decision: Decision = serde_json::from_value(value["decision"].clone())
            .map_err(|e| format!("decision: {e}"))?;
        let confidence = value["confidence"]
            .as_f64()
            .ok_or_else(|| "confidence is not a number".to_string())?;
        Ok(ClassificationResult {
            item_id: self.item_id.to_string(),
            decision,
            confidence,
            reasons: coerce_reasons(value["reasons"].clone()),
        })
    }

    fn fallback(&self) -> ClassificationResult {
        fallback_classification(self.item_id)
    }
}

pub fn fallback_classification(item_id: &str) -> ClassificationResult {
    ClassificationResult {
        item_id: item_id.to_string(),
        decision: Decision::Reject,
        confidence: 0.0,
        reasons: FALLBACK_REASONS.iter().map(|r| r.to_string()).collect(),
    }
}

/// Classify one candidate. Always yields a result.
pub async fn classify(
    cascade: &RepairCascade<'_>,
    prompts: &PromptSet,
    schema: &Schema,
    item: &CandidateItem,
) -> CascadeOutcome<ClassificationResult> {
    let stage = TriageStage::new(schema, &item.item_id);
    match prompts.triage(&item.title, &item.abstract_text) {
        Ok(prompt) => cascade.run(&stage, &item.item_id, &prompt).await,
        Err(e) => RepairCascade::fallback_only(&stage, &item.item_id, e.to_string()),
    }
}
