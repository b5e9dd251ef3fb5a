//! Database error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection lock poisoned")]
    Poisoned,
}

impl From<DbError> for eegdigest_common::DigestError {
    fn from(err: DbError) -> Self {
        eegdigest_common::DigestError::Cache(err.to_string())
    }
}
