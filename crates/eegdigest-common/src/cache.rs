//! Result cache contract.
//!
//! The pipeline only talks to the cache through [`ResultCache`]; whether a cached
//! row is reused is decided by the pure [`cache_decision`] so the cascade logic can
//! be tested without a real store.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DigestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Triage,
    Summary,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Triage  => "triage",
            CacheKind::Summary => "summary",
        }
    }
}

/// Keyed store for per-item stage results.
///
/// Implementations must make `put` atomic per `(kind, item_id)`.
pub trait ResultCache: Send + Sync {
    fn get(&self, kind: CacheKind, item_id: &str) -> Result<Option<Value>>;
    fn put(&self, kind: CacheKind, item_id: &str, value: &Value) -> Result<()>;
}

#[derive(Debug, PartialEq)]
pub enum CacheDecision<T> {
    Reuse(T),
    Fresh,
}

/// Decide whether a cached row can stand in for a fresh model call.
///
/// `force` always wins; a row that no longer deserializes is treated as absent.
pub fn cache_decision<T: DeserializeOwned>(cached: Option<Value>, force: bool) -> CacheDecision<T> {
    if force {
        return CacheDecision::Fresh;
    }
    match cached.map(serde_json::from_value::<T>) {
        Some(Ok(value)) => CacheDecision::Reuse(value),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "Cached row no longer matches model, recomputing");
            CacheDecision::Fresh
        }
        None => CacheDecision::Fresh,
    }
}

/// In-process cache, used when no on-disk store is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    rows: Mutex<HashMap<(CacheKind, String), Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, kind: CacheKind, item_id: &str) -> Result<Option<Value>> {
        let rows = self.rows.lock().map_err(|e| DigestError::Cache(e.to_string()))?;
        Ok(rows.get(&(kind, item_id.to_string())).cloned())
    }

    fn put(&self, kind: CacheKind, item_id: &str, value: &Value) -> Result<()> {
        let mut rows = self.rows.lock().map_err(|e| DigestError::Cache(e.to_string()))?;
        rows.insert((kind, item_id.to_string()), value.clone());
        Ok(())
    }
}
