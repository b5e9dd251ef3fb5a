//! Pipeline coordinator.
//!
//! Runs one batch of candidates through the stages:
//!   1. Classify every candidate (cached result reused unless `force`)
//!   2. Select accepted items, then borderline items if enabled, under the caps
//!   3. For each selected item: reuse a cached summary, or resolve text,
//!      slice it, pick the input mode and summarize
//!   4. Merge everything into per-item records
//!
//! Items are independent. Nothing a single item does can abort the batch:
//! classification always yields a value and enrichment errors become a skip
//! reason on the item.

use std::collections::HashMap;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use eegdigest_common::{
    cache_decision, CacheDecision, CacheKind, CandidateItem, ClassificationResult, Decision,
    DigestError, DigestRecord, ItemState, PaperSummary, ResultCache, TextDiagnostic,
};
use eegdigest_ingestion::{slice_paper_text, SliceLimits, TextResolver};
use eegdigest_llm::GenerativeClient;

use crate::cascade::{CascadeOutcome, RepairCascade, Tier};
use crate::prompt::PromptSet;
use crate::schema::{Schema, Violation};
use crate::summary::{summarize, SummaryOutcome, SummaryRequest};
use crate::triage::classify;

// ── Engine ───────────────────────────────────────────────────────────────────

/// Model clients, prompts and schemas for both stages.
pub struct DigestEngine {
    triage_client: GenerativeClient,
    summary_client: GenerativeClient,
    prompts: PromptSet,
    triage_schema: Schema,
    summary_schema: Schema,
}

impl DigestEngine {
    pub fn new(
        triage_client: GenerativeClient,
        summary_client: GenerativeClient,
        prompts: PromptSet,
        triage_schema: Schema,
        summary_schema: Schema,
    ) -> Self {
        Self { triage_client, summary_client, prompts, triage_schema, summary_schema }
    }

    pub async fn classify(&self, item: &CandidateItem) -> CascadeOutcome<ClassificationResult> {
        let cascade = RepairCascade::new(&self.triage_client, &self.prompts);
        classify(&cascade, &self.prompts, &self.triage_schema, item).await
    }

    pub async fn summarize(&self, req: SummaryRequest<'_>) -> SummaryOutcome {
        let cascade = RepairCascade::new(&self.summary_client, &self.prompts);
        summarize(&cascade, &self.prompts, &self.summary_schema, &self.summary_client, req).await
    }

    /// Check a cached classification against the current triage schema.
    pub fn check_cached_triage(&self, result: &ClassificationResult) -> Result<(), Violation> {
        self.triage_schema.validate(&json!({
            "decision": result.decision.as_str(),
            "confidence": result.confidence,
            "reasons": result.reasons,
        }))
    }

    /// Check a cached summary against the current summary schema.
    pub fn check_cached_summary(&self, summary: &PaperSummary) -> Result<(), Violation> {
        let value = serde_json::to_value(summary)
            .map_err(|e| Violation { path: "/".to_string(), reason: e.to_string() })?;
        self.summary_schema.validate(&value)
    }
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_accepted: usize,
    pub include_borderline: bool,
    pub max_borderline_pdfs: usize,
    pub summary_max_input_tokens: u64,
    pub slice_limits: SliceLimits,
    pub concurrency: usize,
    /// Ignore cached results and call the model again.
    pub force: bool,
    /// Skip text resolution; selected items without a cached summary stay unsummarized.
    pub no_pdf: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_accepted: 80,
            include_borderline: false,
            max_borderline_pdfs: 20,
            summary_max_input_tokens: 120_000,
            slice_limits: SliceLimits::default(),
            concurrency: 1,
            force: false,
            no_pdf: false,
        }
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub candidates: usize,
    pub accepted: usize,
    pub borderline: usize,
    pub rejected: usize,
    pub selected: usize,
    pub summarized: usize,
    pub unsummarized: usize,
    pub triage_cached: usize,
    pub triage_repaired: usize,
    pub triage_fallback: usize,
    pub summary_cached: usize,
    pub summary_repaired: usize,
    pub summary_fallback: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub candidates: Vec<CandidateItem>,
    /// One classification per candidate, in candidate order.
    pub triage: Vec<ClassificationResult>,
    /// Summaries of selected items, in selection order.
    pub summaries: Vec<PaperSummary>,
    /// One merged record per candidate, in candidate order.
    pub records: Vec<DigestRecord>,
    pub stats: RunStats,
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Cached,
    Model(Tier),
}

#[derive(Debug, Default)]
struct ItemEnrichment {
    summary: Option<PaperSummary>,
    text: Option<TextDiagnostic>,
    skip_reason: Option<String>,
    origin: Option<Origin>,
}

impl ItemEnrichment {
    fn skipped(reason: impl Into<String>, text: Option<TextDiagnostic>) -> Self {
        Self { skip_reason: Some(reason.into()), text, ..Default::default() }
    }
}

// ── Selection ────────────────────────────────────────────────────────────────

/// Indices of the candidates to enrich.
///
/// Accepted items come first in `(published, item_id)` order, capped at
/// `max_accepted`. With `include_borderline`, borderline items follow in the
/// same order, capped by `max_borderline_pdfs` and the capacity left under
/// `max_accepted`.
pub fn select_for_enrichment(
    candidates: &[CandidateItem],
    triage: &[ClassificationResult],
    settings: &PipelineSettings,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len().min(triage.len())).collect();
    order.sort_by(|&a, &b| {
        candidates[a]
            .published
            .cmp(&candidates[b].published)
            .then_with(|| candidates[a].item_id.cmp(&candidates[b].item_id))
    });

    let pick = |decision: Decision, cap: usize| -> Vec<usize> {
        order.iter().copied().filter(|&i| triage[i].decision == decision).take(cap).collect()
    };

    let mut selected = pick(Decision::Accept, settings.max_accepted);
    if settings.include_borderline {
        let room = settings.max_accepted.saturating_sub(selected.len());
        selected.extend(pick(Decision::Borderline, settings.max_borderline_pdfs.min(room)));
    }
    selected
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Pipeline<'a> {
    engine: &'a DigestEngine,
    cache: &'a dyn ResultCache,
    resolver: &'a dyn TextResolver,
    settings: PipelineSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        engine: &'a DigestEngine,
        cache: &'a dyn ResultCache,
        resolver: &'a dyn TextResolver,
        settings: PipelineSettings,
    ) -> Self {
        Self { engine, cache, resolver, settings }
    }

    fn cached(&self, kind: CacheKind, item_id: &str) -> Option<serde_json::Value> {
        match self.cache.get(kind, item_id) {
            Ok(row) => row,
            Err(e) => {
                warn!(item_id, kind = kind.as_str(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn classify_item(&self, item: &CandidateItem) -> (ClassificationResult, Origin) {
        let cached = self.cached(CacheKind::Triage, &item.item_id);
        if let CacheDecision::Reuse(mut result) = cache_decision::<ClassificationResult>(cached, self.settings.force) {
            match self.engine.check_cached_triage(&result) {
                Ok(()) => {
                    result.item_id = item.item_id.clone();
                    debug!(item_id = %item.item_id, decision = result.decision.as_str(), "Triage cache hit");
                    return (result, Origin::Cached);
                }
                Err(v) => warn!(item_id = %item.item_id, violation = %v, "Cached triage row is invalid, classifying again"),
            }
        }

        let outcome = self.engine.classify(item).await;
        // Fallbacks are not cached so the next run retries the model.
        if outcome.tier != Tier::Fallback {
            let stored = serde_json::to_value(&outcome.value)
                .map_err(DigestError::from)
                .and_then(|v| self.cache.put(CacheKind::Triage, &item.item_id, &v));
            if let Err(e) = stored {
                warn!(item_id = %item.item_id, error = %e, "Could not cache triage result");
            }
        }
        info!(
            item_id = %item.item_id,
            decision = outcome.value.decision.as_str(),
            confidence = outcome.value.confidence,
            tier = outcome.tier.as_str(),
            "Classified"
        );
        (outcome.value, Origin::Model(outcome.tier))
    }

    async fn enrich_item(
        &self,
        item: &CandidateItem,
        triage: &ClassificationResult,
    ) -> Result<ItemEnrichment, DigestError> {
        let cached = self.cache.get(CacheKind::Summary, &item.item_id)?;
        if let CacheDecision::Reuse(summary) = cache_decision::<PaperSummary>(cached, self.settings.force) {
            match self.engine.check_cached_summary(&summary) {
                Ok(()) => {
                    debug!(item_id = %item.item_id, "Summary cache hit");
                    return Ok(ItemEnrichment { summary: Some(summary), origin: Some(Origin::Cached), ..Default::default() });
                }
                Err(v) => warn!(item_id = %item.item_id, violation = %v, "Cached summary row is invalid, summarizing again"),
            }
        }

        if self.settings.no_pdf {
            return Ok(ItemEnrichment::skipped("no_pdf", None));
        }

        let resolved = match self.resolver.resolve(item).await {
            Ok(r) => r,
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "Text resolution failed");
                return Ok(ItemEnrichment::skipped(format!("text_unavailable:{e}"), None));
            }
        };
        if resolved.text.trim().is_empty() {
            return Ok(ItemEnrichment::skipped("empty_fulltext", Some(resolved.diagnostic)));
        }

        let slices = slice_paper_text(&resolved.text, self.settings.slice_limits);
        let notes = resolved.diagnostic.as_notes();
        let SummaryOutcome { outcome, selection } = self
            .engine
            .summarize(SummaryRequest {
                item,
                triage,
                raw_fulltext: &resolved.text,
                slices: &slices,
                notes: &notes,
                max_input_tokens: self.settings.summary_max_input_tokens,
            })
            .await;

        if outcome.tier != Tier::Fallback {
            let stored = serde_json::to_value(&outcome.value)
                .map_err(DigestError::from)
                .and_then(|v| self.cache.put(CacheKind::Summary, &item.item_id, &v));
            if let Err(e) = stored {
                warn!(item_id = %item.item_id, error = %e, "Could not cache summary");
            }
        }
        info!(
            item_id = %item.item_id,
            mode = selection.mode.as_str(),
            prompt_tokens = ?selection.prompt_tokens,
            tier = outcome.tier.as_str(),
            "Summarized"
        );
        Ok(ItemEnrichment {
            summary: Some(outcome.value),
            text: Some(resolved.diagnostic),
            skip_reason: None,
            origin: Some(Origin::Model(outcome.tier)),
        })
    }

    async fn enrich_guarded(&self, item: &CandidateItem, triage: &ClassificationResult) -> ItemEnrichment {
        match self.enrich_item(item, triage).await {
            Ok(done) => done,
            Err(e) => {
                warn!(item_id = %item.item_id, error = %e, "Item failed, continuing");
                ItemEnrichment::skipped(format!("item_error:{e}"), None)
            }
        }
    }

    /// Run the whole batch. Never fails; problems are recorded per item.
    pub async fn run(&self, candidates: Vec<CandidateItem>) -> RunOutput {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let workers = self.settings.concurrency.max(1);
        info!(%run_id, candidates = candidates.len(), workers, "Digest run started");

        let classified: Vec<(ClassificationResult, Origin)> = stream::iter(candidates.iter())
            .map(|item| self.classify_item(item))
            .buffered(workers)
            .collect()
            .await;

        let mut stats = RunStats { candidates: candidates.len(), ..Default::default() };
        for (result, origin) in &classified {
            match result.decision {
                Decision::Accept     => stats.accepted += 1,
                Decision::Borderline => stats.borderline += 1,
                Decision::Reject     => stats.rejected += 1,
            }
            match origin {
                Origin::Cached                => stats.triage_cached += 1,
                Origin::Model(Tier::Repaired) => stats.triage_repaired += 1,
                Origin::Model(Tier::Fallback) => stats.triage_fallback += 1,
                Origin::Model(Tier::Primary)  => {}
            }
        }
        let triage: Vec<ClassificationResult> = classified.into_iter().map(|(r, _)| r).collect();

        let selected = select_for_enrichment(&candidates, &triage, &self.settings);
        stats.selected = selected.len();
        info!(%run_id, selected = selected.len(), "Selection complete");

        let enriched: Vec<ItemEnrichment> = stream::iter(selected.iter().copied())
            .map(|idx| self.enrich_guarded(&candidates[idx], &triage[idx]))
            .buffered(workers)
            .collect()
            .await;

        let mut summaries = Vec::new();
        let mut by_index: HashMap<usize, ItemEnrichment> = HashMap::new();
        for (idx, enrichment) in selected.iter().copied().zip(enriched) {
            match enrichment.origin {
                Some(Origin::Cached)                => stats.summary_cached += 1,
                Some(Origin::Model(Tier::Repaired)) => stats.summary_repaired += 1,
                Some(Origin::Model(Tier::Fallback)) => stats.summary_fallback += 1,
                _ => {}
            }
            if let Some(summary) = &enrichment.summary {
                summaries.push(summary.clone());
            }
            by_index.insert(idx, enrichment);
        }

        let records: Vec<DigestRecord> = candidates
            .iter()
            .zip(&triage)
            .enumerate()
            .map(|(idx, (paper, result))| {
                let enrichment = by_index.remove(&idx);
                let state = match (&enrichment, result.decision) {
                    (Some(e), _) if e.summary.is_some() => ItemState::AcceptedSummarized,
                    (Some(_), _)                        => ItemState::AcceptedUnsummarized,
                    (None, Decision::Reject)            => ItemState::Rejected,
                    (None, _)                           => ItemState::NotSelected,
                };
                let enrichment = enrichment.unwrap_or_default();
                DigestRecord {
                    paper: paper.clone(),
                    triage: result.clone(),
                    summary: enrichment.summary,
                    text: enrichment.text,
                    state,
                    skip_reason: enrichment.skip_reason,
                }
            })
            .collect();

        stats.summarized = records.iter().filter(|r| r.state == ItemState::AcceptedSummarized).count();
        stats.unsummarized = records.iter().filter(|r| r.state == ItemState::AcceptedUnsummarized).count();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            %run_id,
            candidates = stats.candidates,
            accepted = stats.accepted,
            borderline = stats.borderline,
            rejected = stats.rejected,
            summarized = stats.summarized,
            unsummarized = stats.unsummarized,
            triage_fallback = stats.triage_fallback,
            summary_fallback = stats.summary_fallback,
            duration_ms = stats.duration_ms,
            "Digest run complete"
        );

        RunOutput { run_id, candidates, triage, summaries, records, stats }
    }
}
