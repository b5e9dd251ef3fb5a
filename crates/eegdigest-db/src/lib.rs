//! eegdigest store
//!
//! Embedded SQLite database holding the candidate papers of each run and the
//! cached triage/summary results keyed by base arXiv id. The pipeline reaches
//! the cached results only through [`eegdigest_common::ResultCache`].
//!
//! ```rust,no_run
//! use eegdigest_db::Database;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./data/eegdigest.sqlite")?;
//!     println!("{} papers stored", db.paper_count()?);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;
pub mod papers;
pub mod results;

pub use database::Database;
pub use error::{DbError, Result};
