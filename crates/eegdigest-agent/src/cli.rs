//! Command-line flags. Flags override the loaded configuration.

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;

use eegdigest_config::Config;
use eegdigest_ingestion::Month;

#[derive(Debug, Parser)]
#[command(name = "eegdigest", version, about = "Monthly arXiv digest of EEG foundation model papers")]
pub struct Cli {
    /// Target month as YYYY-MM (default: previous calendar month)
    #[arg(long)]
    pub month: Option<String>,

    /// Upper bound on candidates fetched across all queries
    #[arg(long)]
    pub max_candidates: Option<usize>,

    /// Upper bound on papers sent to enrichment
    #[arg(long)]
    pub max_accepted: Option<usize>,

    /// Also enrich borderline papers
    #[arg(long)]
    pub include_borderline: bool,

    /// Skip PDF download; only cached summaries are used
    #[arg(long)]
    pub no_pdf: bool,

    /// Ignore cached triage and summary results
    #[arg(long)]
    pub force: bool,

    /// Path to eegdigest.toml
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(n) = self.max_candidates {
            config.arxiv.max_candidates = n;
        }
        if let Some(n) = self.max_accepted {
            config.selection.max_accepted = n;
        }
        if self.include_borderline {
            config.selection.include_borderline = true;
        }
    }

    pub fn target_month(&self, today: NaiveDate) -> anyhow::Result<Month> {
        match &self.month {
            Some(raw) => raw.parse().with_context(|| format!("--month '{raw}'")),
            None => Ok(Month::previous_of(today)),
        }
    }
}
