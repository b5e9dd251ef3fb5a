//! eegdigest: monthly arXiv digest of EEG foundation model papers.
//! Entry point for the CLI binary.

mod artifacts;
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eegdigest_config::{Assets, Config, StageConfig};
use eegdigest_db::Database;
use eegdigest_enrich::{DigestEngine, Pipeline, PipelineSettings, PromptSet, Schema};
use eegdigest_ingestion::{
    fetch_month_candidates, ArxivClient, ArxivSettings, PdfTextResolver, RateGate, SliceLimits,
};
use eegdigest_llm::{build_backend, BackendConfig, BackendKind, CallSettings, GenerativeClient, LlmBackend};

use crate::artifacts::{ArtifactWriter, RunMeta};
use crate::cli::Cli;

const DB_FILE: &str = "eegdigest.sqlite";

fn stage_client(
    config: &Config,
    kind: BackendKind,
    stage: &'static str,
    stage_cfg: &StageConfig,
) -> anyhow::Result<GenerativeClient> {
    let backend: Arc<dyn LlmBackend> = build_backend(BackendConfig {
        kind,
        model:    stage_cfg.model.clone(),
        api_key:  config.secrets.key_for_backend(&config.llm.backend),
        base_url: config.llm.base_url.clone(),
        timeout:  config.request_timeout(),
    })
    .with_context(|| format!("building {stage} backend"))?;

    Ok(GenerativeClient::new(
        backend,
        CallSettings {
            stage,
            temperature:       stage_cfg.temperature,
            max_output_tokens: stage_cfg.max_output_tokens,
            timeout:           config.request_timeout(),
        },
    ))
}

/// Compile templates and schemas and build both model clients.
///
/// Everything here fails before the first network request.
fn build_engine(config: &Config, assets: Assets) -> anyhow::Result<DigestEngine> {
    let prompts = PromptSet::compile(&assets.triage_prompt, &assets.summary_prompt, &assets.repair_prompt)?;
    prompts.smoke_test()?;

    let triage_schema = Schema::compile(assets.triage_schema).context("triage schema")?;
    let summary_schema = Schema::compile(assets.summary_schema).context("summary schema")?;

    let kind: BackendKind = config.llm.backend.parse().map_err(anyhow::Error::msg)?;
    let triage = stage_client(config, kind, "triage", &config.llm.triage)?;
    let summary = stage_client(config, kind, "summary", &config.llm.summary)?;
    info!(
        backend = %config.llm.backend,
        triage_model = triage.model_id(),
        summary_model = summary.model_id(),
        "Model clients ready"
    );

    Ok(DigestEngine::new(triage, summary, prompts, triage_schema, summary_schema))
}

fn arxiv_client(config: &Config) -> anyhow::Result<ArxivClient> {
    let a = &config.arxiv;
    let settings = ArxivSettings {
        page_size:       a.page_size,
        max_start:       a.max_start,
        retries:         a.retries,
        retry_backoff:   Duration::from_secs_f64(a.retry_backoff_seconds.max(0.0)),
        connect_timeout: Duration::from_secs_f64(a.connect_timeout_seconds.max(0.0)),
        read_timeout:    Duration::from_secs_f64(a.read_timeout_seconds.max(0.0)),
        ..ArxivSettings::default()
    };
    ArxivClient::new(settings, RateGate::every_seconds(a.rate_limit_seconds))
}

fn pipeline_settings(config: &Config, cli: &Cli) -> PipelineSettings {
    PipelineSettings {
        max_accepted:             config.selection.max_accepted,
        include_borderline:       config.selection.include_borderline,
        max_borderline_pdfs:      config.selection.max_borderline_pdfs,
        summary_max_input_tokens: config.llm.summary_max_input_tokens,
        slice_limits: SliceLimits {
            head_chars: config.text.head_chars,
            tail_chars: config.text.tail_chars,
        },
        concurrency: config.pipeline.concurrency,
        force:       cli.force,
        no_pdf:      cli.no_pdf,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("eegdigest=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    info!("eegdigest {} starting up", env!("CARGO_PKG_VERSION"));

    // ── Configuration (fatal on any error) ──
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    let month = cli.target_month(Utc::now().date_naive())?;
    let assets = Assets::load(&config.paths.prompts_dir, &config.paths.schemas_dir)
        .context("loading prompts and schemas")?;
    let engine = build_engine(&config, assets)?;
    info!(%month, max_candidates = config.arxiv.max_candidates, "Configuration loaded");

    // ── Candidates ──
    let arxiv = arxiv_client(&config)?;
    let candidates = fetch_month_candidates(
        &arxiv,
        &config.arxiv.queries,
        config.arxiv.max_candidates,
        &config.arxiv.categories,
        month,
    )
    .await
    .with_context(|| format!("fetching candidates for {month}"))?;
    info!(%month, candidates = candidates.len(), "Candidates fetched");

    let db = Database::open(config.paths.data_dir.join(DB_FILE))?;
    let stored = db.upsert_papers(&month.to_string(), &candidates)?;
    info!(stored, db = db.path(), "Candidates stored");

    // ── Triage + enrichment ──
    let resolver = PdfTextResolver::new(
        &config.paths.data_dir,
        RateGate::every_seconds(config.pdf.rate_limit_seconds),
        Duration::from_secs(config.pdf.timeout_seconds),
    )?;
    let settings = pipeline_settings(&config, &cli);
    let output = Pipeline::new(&engine, &db, &resolver, settings).run(candidates).await;

    // ── Artifacts ──
    let meta = RunMeta {
        month: month.to_string(),
        generated_at: Utc::now(),
        backend: config.llm.backend.clone(),
        triage_model: config.llm.triage.model.clone(),
        summary_model: config.llm.summary.model.clone(),
        include_borderline: config.selection.include_borderline,
        force: cli.force,
        no_pdf: cli.no_pdf,
    };
    let writer = ArtifactWriter::new(&config.paths.output_dir, &month.to_string());
    writer.write_run(&output, &meta)?;

    info!(
        run_id = %output.run_id,
        summarized = output.stats.summarized,
        dir = %writer.dir().display(),
        "Digest complete"
    );
    Ok(())
}
