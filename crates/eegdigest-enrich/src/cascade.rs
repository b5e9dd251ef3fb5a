//! Repair-and-fallback controller.
//!
//! Every structured stage runs the same three tiers:
//!   1. primary call, parse, stage post-processing, validate
//!   2. one repair call built from the schema and the rejected output
//!   3. a deterministic fallback value
//!
//! Attempts report an explicit [`Attempt`] instead of using errors for control
//! flow, and [`RepairCascade::run`] always returns a value.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use eegdigest_llm::GenerativeClient;

use crate::prompt::PromptSet;
use crate::schema::Schema;

/// Outcome of a single model attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success(T),
    /// The primary attempt produced nothing usable. `raw` is the model output,
    /// empty when the call itself failed.
    NeedsRepair { raw: String, reason: String },
    /// The repair attempt produced nothing usable either.
    Failed { reason: String },
}

/// Which tier produced the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Repaired,
    Fallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary  => "primary",
            Tier::Repaired => "repaired",
            Tier::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeOutcome<T> {
    pub value: T,
    pub tier: Tier,
    /// Why the earlier tiers were rejected, if any were.
    pub reasons: Vec<String>,
}

/// Stage-specific hooks plugged into the cascade.
pub trait Stage {
    type Output;

    fn name(&self) -> &'static str;

    fn schema(&self) -> &Schema;

    /// Adjust parsed model output before validation.
    fn prepare(&self, _value: &mut Value) {}

    /// Convert validated output into the typed result.
    fn finish(&self, value: Value) -> Result<Self::Output, String>;

    /// Structurally valid stand-in used when both attempts fail.
    fn fallback(&self) -> Self::Output;
}

/// Parse model text as a JSON object.
pub fn parse_json_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null      => "null",
        Value::Bool(_)   => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_)  => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse, post-process, validate and convert one raw model output.
pub fn evaluate<S: Stage>(stage: &S, raw: &str) -> Result<S::Output, String> {
    let mut value = parse_json_object(raw)?;
    stage.prepare(&mut value);
    stage.schema().validate(&value).map_err(|v| format!("schema violation at {v}"))?;
    stage.finish(value)
}

pub struct RepairCascade<'a> {
    client: &'a GenerativeClient,
    prompts: &'a PromptSet,
}

impl<'a> RepairCascade<'a> {
    pub fn new(client: &'a GenerativeClient, prompts: &'a PromptSet) -> Self {
        Self { client, prompts }
    }

    async fn primary<S: Stage>(&self, stage: &S, prompt: &str) -> Attempt<S::Output> {
        match self.client.generate(prompt, Some(stage.schema().document())).await {
            Ok(raw) => match evaluate(stage, &raw) {
                Ok(value) => Attempt::Success(value),
                Err(reason) => Attempt::NeedsRepair { raw, reason },
            },
            Err(e) => Attempt::NeedsRepair { raw: String::new(), reason: format!("call failed: {e}") },
        }
    }

    async fn repair<S: Stage>(&self, stage: &S, bad_output: &str) -> Attempt<S::Output> {
        let prompt = match self.prompts.repair(&stage.schema().to_json_string(), bad_output) {
            Ok(p) => p,
            Err(e) => return Attempt::Failed { reason: e.to_string() },
        };
        match self.client.generate(&prompt, Some(stage.schema().document())).await {
            Ok(raw) => match evaluate(stage, &raw) {
                Ok(value) => Attempt::Success(value),
                Err(reason) => Attempt::Failed { reason },
            },
            Err(e) => Attempt::Failed { reason: format!("call failed: {e}") },
        }
    }

    /// Run all tiers for one item. Never fails.
    pub async fn run<S: Stage>(&self, stage: &S, item_id: &str, prompt: &str) -> CascadeOutcome<S::Output> {
        let (raw, first_reason) = match self.primary(stage, prompt).await {
            Attempt::Success(value) => {
                debug!(item_id, stage = stage.name(), tier = "primary", "Structured output accepted");
                return CascadeOutcome { value, tier: Tier::Primary, reasons: vec![] };
            }
            Attempt::NeedsRepair { raw, reason } => (raw, reason),
            Attempt::Failed { reason } => (String::new(), reason),
        };
        debug!(item_id, stage = stage.name(), reason = %first_reason, "Primary output rejected, repairing");

        match self.repair(stage, &raw).await {
            Attempt::Success(value) => {
                debug!(item_id, stage = stage.name(), tier = "repaired", "Structured output accepted");
                CascadeOutcome { value, tier: Tier::Repaired, reasons: vec![first_reason] }
            }
            Attempt::NeedsRepair { reason, .. } | Attempt::Failed { reason } => {
                warn!(item_id, stage = stage.name(), tier = "fallback", reason = %reason, "Using fallback result");
                CascadeOutcome { value: stage.fallback(), tier: Tier::Fallback, reasons: vec![first_reason, reason] }
            }
        }
    }

    /// Fallback outcome for when not even the primary prompt could be built.
    pub fn fallback_only<S: Stage>(stage: &S, item_id: &str, reason: String) -> CascadeOutcome<S::Output> {
        warn!(item_id, stage = stage.name(), tier = "fallback", reason = %reason, "Prompt unavailable, using fallback result");
        CascadeOutcome { value: stage.fallback(), tier: Tier::Fallback, reasons: vec![reason] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Flag {
        schema: Schema,
    }

    impl Stage for Flag {
        type Output = bool;
        fn name(&self) -> &'static str { "flag" }
        fn schema(&self) -> &Schema { &self.schema }
        fn prepare(&self, value: &mut Value) {
            if let Some(obj) = value.as_object_mut() {
                obj.entry("ok").or_insert(json!(false));
            }
        }
        fn finish(&self, value: Value) -> Result<bool, String> {
            value["ok"].as_bool().ok_or_else(|| "ok missing".to_string())
        }
        fn fallback(&self) -> bool { false }
    }

    fn flag() -> Flag {
        Flag {
            schema: Schema::compile(json!({
                "type": "object",
                "required": ["ok"],
                "properties": {"ok": {"type": "boolean"}}
            }))
            .unwrap(),
        }
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_json_object("[1]").unwrap_err().contains("array"));
        assert!(parse_json_object("nope").unwrap_err().starts_with("invalid JSON"));
        assert!(parse_json_object(r#"{"a":1}"#).is_ok());
    }

    #[test]
    fn test_evaluate_applies_prepare_before_validation() {
        assert_eq!(evaluate(&flag(), "{}"), Ok(false));
        assert_eq!(evaluate(&flag(), r#"{"ok": true}"#), Ok(true));
        assert!(evaluate(&flag(), r#"{"ok": "yes"}"#).unwrap_err().contains("/ok"));
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(Tier::Repaired.as_str(), "repaired");
        assert_eq!(serde_json::to_string(&Tier::Fallback).unwrap(), "\"fallback\"");
    }
}
