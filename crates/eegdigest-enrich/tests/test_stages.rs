//! Classification and enrichment stages against a scripted backend.
//!
//! Run with: cargo test --package eegdigest-enrich --test test_stages

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::Value;

use eegdigest_common::{CandidateItem, ClassificationResult, Decision};
use eegdigest_enrich::{
    fallback_classification, select_input_mode, DigestEngine, InputMode, PromptSet, Schema,
    SummaryRequest, Tier,
};
use eegdigest_ingestion::{slice_paper_text, FulltextSlices, SliceLimits};
use eegdigest_test_utils::{
    candidate, client, summary_reply, summary_schema, triage_reply, triage_schema, ScriptedBackend,
    PAPER_TEXT, REPAIR_PROMPT, SUMMARY_PROMPT, TRIAGE_PROMPT,
};

fn prompts() -> PromptSet {
    PromptSet::compile(TRIAGE_PROMPT, SUMMARY_PROMPT, REPAIR_PROMPT).unwrap()
}

fn engine(triage: &Arc<ScriptedBackend>, summary: &Arc<ScriptedBackend>) -> DigestEngine {
    DigestEngine::new(
        client(triage, "triage"),
        client(summary, "summary"),
        prompts(),
        Schema::compile(triage_schema()).unwrap(),
        Schema::compile(summary_schema()).unwrap(),
    )
}

fn idle() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::queue(vec![]))
}

fn item() -> CandidateItem {
    candidate("2501.01234", "NeuroFM", 14)
}

fn accepted(item: &CandidateItem) -> ClassificationResult {
    ClassificationResult {
        item_id: item.item_id.clone(),
        decision: Decision::Accept,
        confidence: 0.9,
        reasons: vec!["eeg foundation model".to_string()],
    }
}

fn slices() -> FulltextSlices {
    slice_paper_text(PAPER_TEXT, SliceLimits::default())
}

// ── Classification cascade ───────────────────────────────────────────────────

#[tokio::test]
async fn test_triage_primary_success() {
    let triage = Arc::new(ScriptedBackend::queue(vec![Ok(triage_reply("accept", 0.92))]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Primary);
    assert_eq!(outcome.value.decision, Decision::Accept);
    assert_eq!(outcome.value.item_id, "2501.01234");
    assert_eq!(triage.calls(), 1);
    assert!(triage.prompts()[0].contains("NeuroFM"));
}

#[tokio::test]
async fn test_triage_scalar_reason_becomes_list() {
    let raw = r#"{"decision": "borderline", "confidence": 0.5, "reasons": "eeg but tiny model"}"#;
    let triage = Arc::new(ScriptedBackend::queue(vec![Ok(raw.to_string())]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Primary);
    assert_eq!(outcome.value.reasons, vec!["eeg but tiny model".to_string()]);
}

#[tokio::test]
async fn test_triage_accepts_six_reasons() {
    let raw = r#"{"decision": "accept", "confidence": 0.9, "reasons": ["a", "b", "c", "d", "e", "f"]}"#;
    let triage = Arc::new(ScriptedBackend::queue(vec![Ok(raw.to_string())]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Primary);
    assert_eq!(outcome.value.decision, Decision::Accept);
    assert_eq!(outcome.value.reasons.len(), 6);
    assert_eq!(triage.calls(), 1);
}

#[tokio::test]
async fn test_triage_repaired_after_bad_output() {
    let triage = Arc::new(ScriptedBackend::queue(vec![
        Ok("Sure! Here is the JSON: {decision: accept}".to_string()),
        Ok(triage_reply("accept", 0.8)),
    ]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Repaired);
    assert_eq!(outcome.value.decision, Decision::Accept);
    assert_eq!(outcome.reasons.len(), 1);

    let repair_prompt = &triage.prompts()[1];
    assert!(repair_prompt.contains("Sure! Here is the JSON: {decision: accept}"));
    assert!(repair_prompt.contains("\"enum\""));
}

#[tokio::test]
async fn test_triage_out_of_range_confidence_is_repaired() {
    let triage = Arc::new(ScriptedBackend::queue(vec![
        Ok(triage_reply("accept", 1.5)),
        Ok(triage_reply("accept", 0.95)),
    ]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Repaired);
    assert!(outcome.reasons[0].contains("/confidence"));
}

#[tokio::test]
async fn test_triage_call_failure_goes_to_repair() {
    let triage = Arc::new(ScriptedBackend::queue(vec![
        Err("upstream 503".to_string()),
        Ok(triage_reply("reject", 0.7)),
    ]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Repaired);
    assert_eq!(outcome.value.decision, Decision::Reject);
    assert!(outcome.reasons[0].starts_with("call failed"));
}

#[tokio::test]
async fn test_triage_both_attempts_unparsable_yield_exact_fallback() {
    let triage = Arc::new(ScriptedBackend::queue(vec![
        Ok("not json at all".to_string()),
        Ok("{\"decision\": ".to_string()),
    ]));
    let outcome = engine(&triage, &idle()).classify(&item()).await;

    assert_eq!(outcome.tier, Tier::Fallback);
    assert_eq!(outcome.value, fallback_classification("2501.01234"));
    assert_eq!(
        outcome.value.reasons,
        vec!["triage_json_error".to_string(), "insufficient_valid_output".to_string()]
    );
    assert_eq!(outcome.value.confidence, 0.0);
    assert_eq!(triage.calls(), 2);
}

#[tokio::test]
async fn test_triage_backend_down_never_errors() {
    let outcome = engine(&idle(), &idle()).classify(&item()).await;
    assert_eq!(outcome.tier, Tier::Fallback);
    assert_eq!(outcome.value.decision, Decision::Reject);
}

// ── Input mode selection ─────────────────────────────────────────────────────

async fn select(raw: &str, tokens: Option<u64>, budget: u64) -> (eegdigest_enrich::ModeSelection, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::queue(vec![]).with_token_count(tokens));
    let it = item();
    let selection = select_input_mode(
        &it,
        &accepted(&it),
        raw,
        &slices(),
        &prompts(),
        &client(&backend, "summary"),
        budget,
    )
    .await;
    (selection, backend)
}

#[tokio::test]
async fn test_empty_text_uses_slices_without_counting() {
    let (selection, backend) = select("  \n\t ", Some(10), 120_000).await;

    assert_eq!(selection.mode, InputMode::FulltextSlices);
    assert_eq!(selection.notes, "input_mode=fulltext_slices;reason=missing_fulltext");
    assert_eq!(backend.token_requests(), 0);
    assert!(selection.payload.get("fulltext_slices").is_some());
}

#[tokio::test]
async fn test_under_budget_uses_fulltext() {
    let (selection, _) = select(PAPER_TEXT, Some(50_000), 120_000).await;

    assert_eq!(selection.mode, InputMode::Fulltext);
    assert!(selection.used_fulltext());
    assert_eq!(selection.notes, "input_mode=fulltext;prompt_tokens=50000");
    assert_eq!(selection.payload["fulltext"], Value::String(PAPER_TEXT.to_string()));
    assert!(selection.payload.get("fulltext_slices").is_none());
}

#[tokio::test]
async fn test_budget_is_inclusive() {
    let (selection, _) = select(PAPER_TEXT, Some(120_000), 120_000).await;
    assert_eq!(selection.mode, InputMode::Fulltext);
}

#[tokio::test]
async fn test_over_budget_uses_slices() {
    let (selection, _) = select(PAPER_TEXT, Some(200_000), 120_000).await;

    assert_eq!(selection.mode, InputMode::FulltextSlices);
    assert!(selection.notes.contains("fulltext_over_limit"));
    assert!(selection.notes.contains("200000"));
    assert!(selection.notes.contains("120000"));
    assert!(selection.payload.get("fulltext").is_none());
    assert_eq!(selection.prompt_tokens, Some(200_000));
}

#[tokio::test]
async fn test_unknown_token_count_uses_slices() {
    let (selection, backend) = select(PAPER_TEXT, None, 120_000).await;

    assert_eq!(selection.mode, InputMode::FulltextSlices);
    assert_eq!(selection.notes, "input_mode=fulltext_slices;reason=count_tokens_failed");
    assert_eq!(backend.token_requests(), 1);
}

#[tokio::test]
async fn test_payload_carries_item_and_triage() {
    let (selection, _) = select(PAPER_TEXT, Some(1), 120_000).await;
    let p = &selection.payload;

    assert_eq!(p["arxiv_id_base"], "2501.01234");
    assert_eq!(p["published_date"], "2025-01-14");
    assert_eq!(p["abstract"], "We study NeuroFM on large EEG corpora.");
    assert_eq!(p["triage"]["decision"], "accept");
    assert_eq!(p["triage"]["reasons"][0], "eeg foundation model");
}

// ── Summary cascade ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_summary_overrides_flags_and_merges_notes() {
    let it = item();
    let summary = Arc::new(ScriptedBackend::queue(vec![Ok(summary_reply(&it))]).with_token_count(Some(4_000)));
    let triage = accepted(&it);
    let slices = slices();

    let out = engine(&idle(), &summary)
        .summarize(SummaryRequest {
            item: &it,
            triage: &triage,
            raw_fulltext: PAPER_TEXT,
            slices: &slices,
            notes: "text_tool=fixture",
            max_input_tokens: 120_000,
        })
        .await;

    assert_eq!(out.outcome.tier, Tier::Primary);
    assert!(out.outcome.value.used_fulltext);
    assert_eq!(out.outcome.value.notes, "text_tool=fixture;input_mode=fulltext;prompt_tokens=4000");
    assert_eq!(out.outcome.value.paper_type, "new_model");
    assert_eq!(summary.calls(), 1);
}

#[tokio::test]
async fn test_summary_repaired_after_bad_output() {
    let it = item();
    let summary = Arc::new(
        ScriptedBackend::queue(vec![Ok("not json".to_string()), Ok(summary_reply(&it))]).with_token_count(Some(4_000)),
    );
    let triage = accepted(&it);
    let slices = slices();

    let out = engine(&idle(), &summary)
        .summarize(SummaryRequest {
            item: &it,
            triage: &triage,
            raw_fulltext: PAPER_TEXT,
            slices: &slices,
            notes: "text_tool=fixture",
            max_input_tokens: 120_000,
        })
        .await;

    assert_eq!(out.outcome.tier, Tier::Repaired);
    assert!(out.outcome.value.used_fulltext);
    assert_eq!(out.outcome.value.notes, "text_tool=fixture;input_mode=fulltext;prompt_tokens=4000");
    assert_eq!(out.outcome.value.one_liner, "NeuroFM pretrains a transformer on unlabeled EEG.");
    assert_eq!(summary.calls(), 2);

    let repair_prompt = &summary.prompts()[1];
    assert!(repair_prompt.contains("not json"));
    assert!(repair_prompt.contains("\"used_fulltext\""));
}

#[tokio::test]
async fn test_summary_slices_mode_sets_used_fulltext_false() {
    let it = item();
    let summary = Arc::new(ScriptedBackend::queue(vec![Ok(summary_reply(&it))]).with_token_count(Some(900_000)));
    let triage = accepted(&it);
    let slices = slices();

    let out = engine(&idle(), &summary)
        .summarize(SummaryRequest {
            item: &it,
            triage: &triage,
            raw_fulltext: PAPER_TEXT,
            slices: &slices,
            notes: "",
            max_input_tokens: 120_000,
        })
        .await;

    assert!(!out.outcome.value.used_fulltext);
    assert!(out.outcome.value.notes.starts_with("input_mode=fulltext_slices;reason=fulltext_over_limit"));
    assert!(summary.prompts()[0].contains("fulltext_slices"));
}

#[tokio::test]
async fn test_summary_fallback_after_two_failures() {
    let it = item();
    let summary = Arc::new(
        ScriptedBackend::queue(vec![Ok("[]".to_string()), Ok("{\"one_liner\": 3}".to_string())])
            .with_token_count(Some(100)),
    );
    let triage = accepted(&it);
    let slices = slices();

    let out = engine(&idle(), &summary)
        .summarize(SummaryRequest {
            item: &it,
            triage: &triage,
            raw_fulltext: PAPER_TEXT,
            slices: &slices,
            notes: "text_tool=fixture",
            max_input_tokens: 120_000,
        })
        .await;

    let fb = out.outcome.value;
    assert_eq!(out.outcome.tier, Tier::Fallback);
    assert_eq!(fb.one_liner, "Summary unavailable due to JSON validation failure.");
    assert_eq!(fb.paper_type, "other");
    assert_eq!(fb.key_points, vec!["unknown"; 3]);
    assert_eq!(fb.limitations, vec!["unknown", "summary_json_error"]);
    assert!(fb.used_fulltext);
    assert_eq!(fb.notes, "text_tool=fixture;input_mode=fulltext;prompt_tokens=100;summary_json_error");
    assert_eq!(fb.item_id, "2501.01234");
    assert_eq!(fb.published_date, "2025-01-14");

    // The fallback itself satisfies the shipped schema.
    let schema = Schema::compile(summary_schema()).unwrap();
    assert_eq!(schema.validate(&serde_json::to_value(&fb).unwrap()), Ok(()));
}
