//! eegdigest-ingestion: candidate discovery and document text.
//! - arXiv Atom search with paging, retry and a shared rate gate
//! - Month/category filtering and version de-duplication
//! - PDF download with cached text extraction
//! - Heading-based section slicing

pub mod sources;
pub mod dedup;
pub mod month;
pub mod pdf;
pub mod rate;
pub mod sections;

pub use month::Month;
pub use pdf::{PdfTextResolver, ResolvedText, TextResolver};
pub use rate::RateGate;
pub use sections::{bounded_text, slice_paper_text, FulltextSlices, SliceLimits};
pub use sources::arxiv::{fetch_month_candidates, ArxivClient, ArxivSettings};
pub use sources::CandidateSource;
