//! Configuration loading for eegdigest.
//!
//! Reads `eegdigest.toml` (or the path in `EEGDIGEST_CONFIG`), then applies
//! environment overrides and credentials exactly once. The resulting [`Config`]
//! is passed by reference to every component; nothing reads the environment
//! after startup.

pub mod assets;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use assets::Assets;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Could not read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid JSON in {path}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("Missing credential: {0}")]
    MissingCredential(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_CONFIG_PATH: &str = "eegdigest.toml";
const KNOWN_BACKENDS: &[&str] = &["gemini", "openai_compatible", "openai", "ollama"];

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

// ── LLM ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Required for OpenAI-compatible backends; optional override for Gemini.
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_triage_stage")]
    pub triage: StageConfig,
    #[serde(default = "default_summary_stage")]
    pub summary: StageConfig,
    /// Largest full-text prompt admitted to the summary stage.
    #[serde(default = "default_max_input_tokens")]
    pub summary_max_input_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_output_tokens: u32,
}

fn default_backend()           -> String { "gemini".to_string() }
fn default_model()             -> String { "gemini-3-flash-preview".to_string() }
fn default_request_timeout()   -> u64    { 180 }
fn default_temperature()       -> f32    { 0.2 }
fn default_max_input_tokens()  -> u64    { 120_000 }
fn default_triage_stage() -> StageConfig {
    StageConfig { model: default_model(), temperature: default_temperature(), max_output_tokens: 1024 }
}
fn default_summary_stage() -> StageConfig {
    StageConfig { model: default_model(), temperature: default_temperature(), max_output_tokens: 2048 }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
            triage: default_triage_stage(),
            summary: default_summary_stage(),
            summary_max_input_tokens: default_max_input_tokens(),
        }
    }
}

// ── arXiv ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_rate_limit")]
    pub rate_limit_seconds: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: f64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: f64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: f64,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_start")]
    pub max_start: usize,
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

fn default_arxiv_rate_limit() -> f64   { 2.0 }
fn default_connect_timeout()  -> f64   { 10.0 }
fn default_read_timeout()     -> f64   { 60.0 }
fn default_retries()          -> u32   { 2 }
fn default_retry_backoff()    -> f64   { 2.0 }
fn default_max_candidates()   -> usize { 500 }
fn default_page_size()        -> usize { 100 }
fn default_max_start()        -> usize { 5000 }

fn default_queries() -> Vec<String> {
    vec![
        r#"(abs:EEG OR abs:electroencephalography OR abs:electroencephalogram) AND (abs:"foundation model" OR abs:"large brain model" OR abs:pretrained OR abs:pretraining OR abs:"self-supervised")"#.to_string(),
        r#"(ti:EEG OR ti:electroencephalography OR ti:"brain signals") AND (abs:"large-scale" OR abs:transformer OR abs:"masked modeling" OR abs:"universal representation")"#.to_string(),
    ]
}

fn default_categories() -> Vec<String> {
    ["cs.LG", "cs.AI", "cs.CL", "cs.CV", "cs.NE", "eess.SP", "q-bio.NC", "stat.ML"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            rate_limit_seconds: default_arxiv_rate_limit(),
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            retries: default_retries(),
            retry_backoff_seconds: default_retry_backoff(),
            max_candidates: default_max_candidates(),
            page_size: default_page_size(),
            max_start: default_max_start(),
            queries: default_queries(),
            categories: default_categories(),
        }
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PdfConfig {
    #[serde(default = "default_pdf_rate_limit")]
    pub rate_limit_seconds: f64,
    #[serde(default = "default_pdf_timeout")]
    pub timeout_seconds: u64,
}

fn default_pdf_rate_limit() -> f64 { 5.0 }
fn default_pdf_timeout()    -> u64 { 60 }

impl Default for PdfConfig {
    fn default() -> Self {
        Self { rate_limit_seconds: default_pdf_rate_limit(), timeout_seconds: default_pdf_timeout() }
    }
}

// ── Selection / text budgets / paths / pipeline ──────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_max_accepted")]
    pub max_accepted: usize,
    #[serde(default)]
    pub include_borderline: bool,
    #[serde(default = "default_max_borderline")]
    pub max_borderline_pdfs: usize,
}

fn default_max_accepted()   -> usize { 80 }
fn default_max_borderline() -> usize { 20 }

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_accepted: default_max_accepted(),
            include_borderline: false,
            max_borderline_pdfs: default_max_borderline(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextConfig {
    #[serde(default = "default_head_chars")]
    pub head_chars: usize,
    #[serde(default = "default_tail_chars")]
    pub tail_chars: usize,
}

fn default_head_chars() -> usize { 80_000 }
fn default_tail_chars() -> usize { 20_000 }

impl Default for TextConfig {
    fn default() -> Self {
        Self { head_chars: default_head_chars(), tail_chars: default_tail_chars() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: PathBuf,
}

fn default_output_dir()  -> PathBuf { PathBuf::from("outputs") }
fn default_data_dir()    -> PathBuf { PathBuf::from("data") }
fn default_prompts_dir() -> PathBuf { PathBuf::from("prompts") }
fn default_schemas_dir() -> PathBuf { PathBuf::from("schemas") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            data_dir: default_data_dir(),
            prompts_dir: default_prompts_dir(),
            schemas_dir: default_schemas_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Items processed concurrently per stage. 1 = strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize { 1 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { concurrency: default_concurrency() }
    }
}

// ── Secrets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Secrets {
    pub gemini_api_key: Option<SecretString>,
    /// Bearer token for OpenAI-compatible endpoints, if they need one.
    pub llm_api_key: Option<SecretString>,
}

impl Secrets {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Self {
            gemini_api_key: non_empty("GEMINI_API_KEY")
                .or_else(|| non_empty("GOOGLE_API_KEY"))
                .map(SecretString::from),
            llm_api_key: non_empty("LLM_API_KEY").map(SecretString::from),
        }
    }

    /// Owned copy of the key `backend` authenticates with.
    pub fn key_for_backend(&self, backend: &str) -> Option<SecretString> {
        let key = if backend.trim().eq_ignore_ascii_case("gemini") {
            &self.gemini_api_key
        } else {
            &self.llm_api_key
        };
        key.as_ref().map(|k| SecretString::from(k.expose_secret().to_owned()))
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes"       => Ok(true),
        "0" | "false" | "no" | ""  => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }),
    }
}

impl Config {
    /// Load configuration from TOML, `.env` and the process environment.
    ///
    /// An explicit `path` (or `EEGDIGEST_CONFIG`) must exist; the default
    /// `eegdigest.toml` is optional and falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("EEGDIGEST_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p));
                }
                Self::from_file(&p)?
            }
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Config::default()
                }
            }
        };

        config.apply_overrides(|k| std::env::var(k).ok())?;
        config.secrets = Secrets::from_lookup(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply environment-style overrides through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        macro_rules! set {
            ($key:literal, $field:expr) => {
                if let Some(v) = lookup($key) {
                    $field = parse_value($key, &v)?;
                }
            };
        }

        if let Some(v) = lookup("LLM_BACKEND")          { self.llm.backend = v; }
        if let Some(v) = lookup("LLM_BASE_URL")         { self.llm.base_url = Some(v); }
        if let Some(v) = lookup("GEMINI_MODEL_TRIAGE")  { self.llm.triage.model = v; }
        if let Some(v) = lookup("GEMINI_MODEL_SUMMARY") { self.llm.summary.model = v; }
        if let Some(v) = lookup("OUTPUT_DIR")           { self.paths.output_dir = PathBuf::from(v); }
        if let Some(v) = lookup("DATA_DIR")             { self.paths.data_dir = PathBuf::from(v); }
        if let Some(v) = lookup("INCLUDE_BORDERLINE") {
            self.selection.include_borderline = parse_flag("INCLUDE_BORDERLINE", &v)?;
        }

        set!("LLM_REQUEST_TIMEOUT_SECONDS",   self.llm.request_timeout_secs);
        set!("LLM_TEMPERATURE_TRIAGE",        self.llm.triage.temperature);
        set!("LLM_TEMPERATURE_SUMMARY",       self.llm.summary.temperature);
        set!("LLM_MAX_OUTPUT_TOKENS_TRIAGE",  self.llm.triage.max_output_tokens);
        set!("LLM_MAX_OUTPUT_TOKENS_SUMMARY", self.llm.summary.max_output_tokens);
        set!("SUMMARY_MAX_INPUT_TOKENS",      self.llm.summary_max_input_tokens);
        set!("ARXIV_RATE_LIMIT_SECONDS",      self.arxiv.rate_limit_seconds);
        set!("ARXIV_CONNECT_TIMEOUT_SECONDS", self.arxiv.connect_timeout_seconds);
        set!("ARXIV_READ_TIMEOUT_SECONDS",    self.arxiv.read_timeout_seconds);
        set!("ARXIV_RETRIES",                 self.arxiv.retries);
        set!("ARXIV_RETRY_BACKOFF_SECONDS",   self.arxiv.retry_backoff_seconds);
        set!("MAX_CANDIDATES",                self.arxiv.max_candidates);
        set!("PDF_RATE_LIMIT_SECONDS",        self.pdf.rate_limit_seconds);
        set!("MAX_ACCEPTED",                  self.selection.max_accepted);
        set!("MAX_BORDERLINE_PDFS",           self.selection.max_borderline_pdfs);
        set!("TEXT_HEAD_CHARS",               self.text.head_chars);
        set!("TEXT_TAIL_CHARS",               self.text.tail_chars);
        set!("PIPELINE_CONCURRENCY",          self.pipeline.concurrency);
        Ok(())
    }

    /// Reject configurations that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let backend = self.llm.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&backend.as_str()) {
            return Err(ConfigError::Invalid(format!("unknown llm.backend '{}'", self.llm.backend)));
        }
        if backend == "gemini" && self.secrets.gemini_api_key.is_none() {
            return Err(ConfigError::MissingCredential(
                "set GEMINI_API_KEY or GOOGLE_API_KEY".to_string(),
            ));
        }
        if backend != "gemini" && self.llm.base_url.is_none() {
            return Err(ConfigError::Invalid(format!(
                "llm.base_url is required for backend '{}'",
                self.llm.backend
            )));
        }
        for (name, stage) in [("triage", &self.llm.triage), ("summary", &self.llm.summary)] {
            if !(0.0..=2.0).contains(&stage.temperature) {
                return Err(ConfigError::Invalid(format!("llm.{name}.temperature must be within [0, 2]")));
            }
            if stage.max_output_tokens == 0 {
                return Err(ConfigError::Invalid(format!("llm.{name}.max_output_tokens must be > 0")));
            }
        }
        if self.pipeline.concurrency == 0 {
            return Err(ConfigError::Invalid("pipeline.concurrency must be >= 1".to_string()));
        }
        if self.text.head_chars == 0 {
            return Err(ConfigError::Invalid("text.head_chars must be > 0".to_string()));
        }
        if self.arxiv.page_size == 0 || self.arxiv.queries.is_empty() {
            return Err(ConfigError::Invalid("arxiv needs page_size > 0 and at least one query".to_string()));
        }
        if self.arxiv.rate_limit_seconds < 0.0 || self.pdf.rate_limit_seconds < 0.0 {
            return Err(ConfigError::Invalid("rate limits must be non-negative".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.llm.request_timeout_secs)
    }
}
