//! Candidate source clients.

pub mod arxiv;

use async_trait::async_trait;
use eegdigest_common::CandidateItem;

/// Common interface for paper search backends.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Run one search query and return at most `max_results` parsed entries,
    /// newest submissions first.
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<CandidateItem>>;
}
