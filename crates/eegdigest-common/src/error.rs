use thiserror::Error;

/// Errors that can escape a single item's processing. The pipeline records
/// them as the item's skip reason and carries on.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),
}

pub type Result<T> = std::result::Result<T, DigestError>;
