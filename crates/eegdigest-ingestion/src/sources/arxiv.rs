//! arXiv Atom API client.
//!
//! Endpoint: https://export.arxiv.org/api/query
//!
//! Results are paged newest-first by submission date. Every request passes the
//! shared [`RateGate`]; transport failures and 5xx answers are retried with
//! exponential backoff, anything else fails the fetch.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use eegdigest_common::{CandidateItem, PaperLinks};

use super::CandidateSource;
use crate::dedup::{dedupe_latest, filter_candidates};
use crate::month::Month;
use crate::rate::RateGate;

pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Clone)]
pub struct ArxivSettings {
    pub base_url: String,
    pub page_size: usize,
    pub max_start: usize,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        Self {
            base_url: ARXIV_API_URL.to_string(),
            page_size: 100,
            max_start: 5000,
            retries: 2,
            retry_backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ArxivClient {
    client: reqwest::Client,
    gate: RateGate,
    settings: ArxivSettings,
}

impl ArxivClient {
    pub fn new(settings: ArxivSettings, gate: RateGate) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.connect_timeout + settings.read_timeout)
            .user_agent(concat!("eegdigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building arXiv HTTP client")?;
        Ok(Self { client, gate, settings })
    }

    /// Backoff before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.settings.retry_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, query: &str, start: usize, chunk: usize) -> anyhow::Result<String> {
        let params = [
            ("search_query", query.to_string()),
            ("start", start.to_string()),
            ("max_results", chunk.to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ];

        let mut attempt = 0u32;
        loop {
            self.gate.wait().await;
            let failure = match self.client.get(&self.settings.base_url).query(&params).send().await {
                Ok(resp) if resp.status().is_server_error() => anyhow!("arXiv returned {}", resp.status()),
                Ok(resp) => {
                    let resp = resp.error_for_status().context("arXiv rejected the query")?;
                    return Ok(resp.text().await?);
                }
                Err(e) => anyhow::Error::new(e),
            };

            attempt += 1;
            if attempt > self.settings.retries {
                return Err(failure.context(format!(
                    "arXiv request failed after {attempt} attempts (start={start}, max_results={chunk})"
                )));
            }
            let wait = self.backoff(attempt);
            warn!(attempt, error = %failure, wait_ms = wait.as_millis() as u64, "arXiv request failed, retrying");
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl CandidateSource for ArxivClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<CandidateItem>> {
        let mut results = Vec::new();
        let mut start = 0usize;
        while start <= self.settings.max_start && results.len() < max_results {
            let chunk = self.settings.page_size.min(max_results - results.len());
            let xml = self.fetch_page(query, start, chunk).await?;
            let parsed = parse_atom_feed(&xml)?;
            let received = parsed.len();
            results.extend(parsed);
            debug!(start, received, "arXiv page parsed");
            if received < chunk {
                break;
            }
            start += chunk;
        }
        results.truncate(max_results);
        Ok(results)
    }
}

/// Run every query, then keep this month's in-category items, latest version
/// only, ordered by `(published, item_id)`.
pub async fn fetch_month_candidates(
    source: &dyn CandidateSource,
    queries: &[String],
    max_candidates: usize,
    categories: &[String],
    month: Month,
) -> anyhow::Result<Vec<CandidateItem>> {
    let mut combined = Vec::new();
    for query in queries {
        combined.extend(source.search(query, max_candidates).await?);
    }
    let fetched = combined.len();
    let candidates = dedupe_latest(filter_candidates(combined, categories, month));
    info!(%month, fetched, kept = candidates.len(), "Candidate fetch complete");
    Ok(candidates)
}

// ── Atom parsing ─────────────────────────────────────────────────────────────

fn arxiv_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<base>.+?)(?:v(?P<ver>\d+))?$").expect("valid arXiv id regex"))
}

/// Split an entry id (URL or bare id) into base id and version (default 1).
pub fn parse_arxiv_id(raw_id: &str) -> (String, u32) {
    let tail = raw_id.rsplit('/').next().unwrap_or(raw_id);
    match arxiv_id_pattern().captures(tail) {
        Some(caps) => {
            let base = caps.name("base").map_or(tail, |m| m.as_str()).to_string();
            let version = caps
                .name("ver")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1);
            (base, version)
        }
        None => (tail.to_string(), 1),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    categories: Vec<String>,
    published: String,
    updated: String,
    pdf_typed: Option<String>,
    pdf_titled: Option<String>,
}

impl EntryBuilder {
    fn absorb_attrs(&mut self, e: &BytesStart<'_>) {
        let attr = |name: &[u8]| -> Option<String> {
            e.attributes()
                .flatten()
                .find(|a| a.key.as_ref() == name)
                .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        };
        match e.name().as_ref() {
            b"category" => {
                self.categories.push(attr(b"term").unwrap_or_default());
            }
            b"link" => {
                let href = attr(b"href").unwrap_or_default();
                if self.pdf_typed.is_none() && attr(b"type").as_deref() == Some("application/pdf") {
                    self.pdf_typed = Some(href.clone());
                }
                if self.pdf_titled.is_none() && attr(b"title").as_deref() == Some("pdf") {
                    self.pdf_titled = Some(href);
                }
            }
            _ => {}
        }
    }

    fn build(self) -> anyhow::Result<CandidateItem> {
        let (item_id, version) = parse_arxiv_id(&self.id);
        let parse_ts = |s: &str| -> anyhow::Result<DateTime<Utc>> {
            Ok(DateTime::parse_from_rfc3339(s.trim())
                .with_context(|| format!("bad timestamp '{s}' on {}", self.id))?
                .with_timezone(&Utc))
        };
        let published = parse_ts(&self.published)?;
        let updated = if self.updated.trim().is_empty() { published } else { parse_ts(&self.updated)? };
        Ok(CandidateItem {
            arxiv_id: self.id.rsplit('/').next().unwrap_or(&self.id).to_string(),
            item_id,
            version,
            title: collapse_whitespace(&self.title),
            abstract_text: collapse_whitespace(&self.summary),
            authors: self.authors,
            categories: self.categories,
            published,
            updated,
            links: PaperLinks {
                abs: self.id.clone(),
                pdf: self.pdf_typed.or(self.pdf_titled).unwrap_or_default(),
            },
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    AuthorName,
    Published,
    Updated,
}

/// Parse an arXiv Atom feed into candidate items. Entries with an unusable id or
/// timestamp are skipped with a warning.
pub fn parse_atom_feed(xml: &str) -> anyhow::Result<Vec<CandidateItem>> {
    let mut items = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field = Field::None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                match e.name().as_ref() {
                    b"entry"  => current = Some(EntryBuilder::default()),
                    b"author" => in_author = true,
                    name if current.is_some() => {
                        field = match name {
                            b"id"                => Field::Id,
                            b"title"             => Field::Title,
                            b"summary"           => Field::Summary,
                            b"name" if in_author => Field::AuthorName,
                            b"published"         => Field::Published,
                            b"updated"           => Field::Updated,
                            _                    => Field::None,
                        };
                        text.clear();
                        if let Some(ref mut entry) = current {
                            entry.absorb_attrs(e);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(ref mut entry) = current {
                    entry.absorb_attrs(e);
                }
            }
            Ok(Event::Text(ref e)) => {
                if field != Field::None {
                    text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(ref e)) => {
                if field != Field::None {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                match e.name().as_ref() {
                    b"author" => in_author = false,
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if entry.id.trim().is_empty() {
                                warn!("Skipping arXiv entry without id");
                            } else {
                                match entry.build() {
                                    Ok(item) => items.push(item),
                                    Err(e) => warn!(error = %e, "Skipping malformed arXiv entry"),
                                }
                            }
                        }
                    }
                    _ => {
                        if let Some(ref mut entry) = current {
                            let value = std::mem::take(&mut text);
                            match field {
                                Field::Id         => entry.id = value.trim().to_string(),
                                Field::Title      => entry.title = value,
                                Field::Summary    => entry.summary = value,
                                Field::AuthorName => entry.authors.push(value.trim().to_string()),
                                Field::Published  => entry.published = value,
                                Field::Updated    => entry.updated = value,
                                Field::None       => {}
                            }
                        }
                        field = Field::None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(
                    "arXiv feed is not valid XML at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query</title>
  <id>http://arxiv.org/api/feedid</id>
  <entry>
    <id>http://arxiv.org/abs/2501.01234v2</id>
    <updated>2025-01-10T08:00:00Z</updated>
    <published>2025-01-05T17:30:00Z</published>
    <title>A Large   Brain Model
      for EEG</title>
    <summary>  We pretrain a transformer
      on 10,000 hours &amp; more.  </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name><arxiv:affiliation>Bletchley</arxiv:affiliation></author>
    <arxiv:primary_category term="cs.LG"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="eess.SP" scheme="http://arxiv.org/schemas/atom"/>
    <link href="http://arxiv.org/abs/2501.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2501.01234v2" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2501.09999</id>
    <published>2025-01-06T00:00:00Z</published>
    <updated>2025-01-06T00:00:00Z</updated>
    <title>No pdf here</title>
    <summary>x</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_arxiv_id() {
        assert_eq!(parse_arxiv_id("http://arxiv.org/abs/2501.01234v3"), ("2501.01234".to_string(), 3));
        assert_eq!(parse_arxiv_id("2501.01234"), ("2501.01234".to_string(), 1));
        assert_eq!(parse_arxiv_id("http://arxiv.org/abs/hep-th/9901001v1"), ("9901001".to_string(), 1));
    }

    #[test]
    fn test_parse_feed_entries() {
        let items = parse_atom_feed(FEED).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.item_id, "2501.01234");
        assert_eq!(first.arxiv_id, "2501.01234v2");
        assert_eq!(first.version, 2);
        assert_eq!(first.title, "A Large Brain Model for EEG");
        assert_eq!(first.abstract_text, "We pretrain a transformer on 10,000 hours & more.");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.categories, vec!["cs.LG", "eess.SP"]);
        assert_eq!(first.published_date(), "2025-01-05");
        assert_eq!(first.links.abs, "http://arxiv.org/abs/2501.01234v2");
        assert_eq!(first.links.pdf, "http://arxiv.org/pdf/2501.01234v2");

        assert_eq!(items[1].links.pdf, "");
        assert_eq!(items[1].version, 1);
    }

    #[test]
    fn test_entry_with_bad_timestamp_is_skipped() {
        let xml = r#"<feed><entry><id>http://arxiv.org/abs/1</id><published>yesterday</published><title>t</title></entry></feed>"#;
        assert!(parse_atom_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let client = ArxivClient::new(
            ArxivSettings { retry_backoff: Duration::from_secs(2), ..Default::default() },
            RateGate::unlimited(),
        )
        .unwrap();
        assert_eq!(client.backoff(1), Duration::from_secs(2));
        assert_eq!(client.backoff(2), Duration::from_secs(4));
        assert_eq!(client.backoff(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let client = ArxivClient::new(
            ArxivSettings {
                base_url: "http://127.0.0.1:9/api/query".to_string(),
                retries: 1,
                retry_backoff: Duration::ZERO,
                connect_timeout: Duration::from_secs(2),
                read_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            RateGate::unlimited(),
        )
        .unwrap();
        let err = client.fetch_page("all:eeg", 0, 10).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"), "{err:#}");
    }
}
