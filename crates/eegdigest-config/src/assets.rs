//! Prompt templates and JSON schemas shipped alongside the binary.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::ConfigError;

pub const TRIAGE_PROMPT: &str = "triage.md";
pub const SUMMARY_PROMPT: &str = "summarize.md";
pub const REPAIR_PROMPT: &str = "repair.md";
pub const TRIAGE_SCHEMA: &str = "triage.json";
pub const SUMMARY_SCHEMA: &str = "summary.json";

/// Raw prompt sources and parsed schema documents.
#[derive(Debug, Clone)]
pub struct Assets {
    pub triage_prompt: String,
    pub summary_prompt: String,
    pub repair_prompt: String,
    pub triage_schema: Value,
    pub summary_schema: Value,
}

impl Assets {
    pub fn load(prompts_dir: &Path, schemas_dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            triage_prompt: read_text(&prompts_dir.join(TRIAGE_PROMPT))?,
            summary_prompt: read_text(&prompts_dir.join(SUMMARY_PROMPT))?,
            repair_prompt: read_text(&prompts_dir.join(REPAIR_PROMPT))?,
            triage_schema: read_json(&schemas_dir.join(TRIAGE_SCHEMA))?,
            summary_schema: read_json(&schemas_dir.join(SUMMARY_SCHEMA))?,
        })
    }
}

fn read_text(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} is empty", path.display())));
    }
    Ok(text)
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let text = read_text(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: PathBuf::from(path),
        source,
    })?;
    if !value.is_object() {
        return Err(ConfigError::Invalid(format!("{} must hold a JSON object", path.display())));
    }
    Ok(value)
}
