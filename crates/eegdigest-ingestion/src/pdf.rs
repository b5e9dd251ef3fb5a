//! PDF download and text extraction.
//!
//! Files are cached on disk: `<data>/pdfs/<id>.pdf` and `<data>/text/<id>.txt`.
//! Extraction tries `pdf-extract` first and falls back to `lopdf`; when both fail
//! an empty text file is written so the item is not re-extracted next run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use eegdigest_common::{CandidateItem, TextDiagnostic};

use crate::rate::RateGate;

/// Document text plus how it was obtained. Empty text is a valid result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedText {
    pub text: String,
    pub diagnostic: TextDiagnostic,
}

/// Turns a candidate into its full text.
#[async_trait]
pub trait TextResolver: Send + Sync {
    async fn resolve(&self, item: &CandidateItem) -> anyhow::Result<ResolvedText>;
}

pub struct PdfTextResolver {
    client: reqwest::Client,
    gate: RateGate,
    pdf_dir: PathBuf,
    text_dir: PathBuf,
}

impl PdfTextResolver {
    pub fn new(data_dir: &Path, gate: RateGate, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eegdigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building PDF HTTP client")?;
        Ok(Self {
            client,
            gate,
            pdf_dir: data_dir.join("pdfs"),
            text_dir: data_dir.join("text"),
        })
    }

    fn file_stem(item: &CandidateItem) -> String {
        item.item_id.replace('/', "_")
    }

    pub fn pdf_path(&self, item: &CandidateItem) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", Self::file_stem(item)))
    }

    pub fn text_path(&self, item: &CandidateItem) -> PathBuf {
        self.text_dir.join(format!("{}.txt", Self::file_stem(item)))
    }

    #[instrument(skip(self, item), fields(item_id = %item.item_id))]
    async fn download(&self, item: &CandidateItem, out: &Path) -> anyhow::Result<()> {
        if tokio::fs::try_exists(out).await.unwrap_or(false) {
            debug!("PDF already on disk");
            return Ok(());
        }
        if item.links.pdf.is_empty() {
            bail!("no pdf link");
        }
        tokio::fs::create_dir_all(&self.pdf_dir).await?;

        self.gate.wait().await;
        let bytes = self
            .client
            .get(&item.links.pdf)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        // Write under a temporary name so an interrupted download never looks complete.
        let partial = out.with_extension("pdf.part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, out).await?;
        info!(bytes = bytes.len(), "PDF downloaded");
        Ok(())
    }
}

#[async_trait]
impl TextResolver for PdfTextResolver {
    async fn resolve(&self, item: &CandidateItem) -> anyhow::Result<ResolvedText> {
        let text_path = self.text_path(item);
        if tokio::fs::try_exists(&text_path).await.unwrap_or(false) {
            let text = tokio::fs::read_to_string(&text_path).await?;
            return Ok(ResolvedText {
                diagnostic: TextDiagnostic { tool: "cached".to_string(), pages: None, chars: text.chars().count(), error: None },
                text,
            });
        }

        let pdf_path = self.pdf_path(item);
        self.download(item, &pdf_path).await?;
        let bytes = tokio::fs::read(&pdf_path).await?;

        let resolved = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .unwrap_or_else(|e| ResolvedText {
                text: String::new(),
                diagnostic: TextDiagnostic {
                    tool: "none".to_string(),
                    pages: None,
                    chars: 0,
                    error: Some(format!("extract_failed:{e}")),
                },
            });

        tokio::fs::create_dir_all(&self.text_dir).await?;
        tokio::fs::write(&text_path, &resolved.text).await?;
        debug!(
            item_id = %item.item_id,
            tool = %resolved.diagnostic.tool,
            chars = resolved.diagnostic.chars,
            "Text extracted"
        );
        Ok(resolved)
    }
}

fn pdf_extract_pages(bytes: &[u8]) -> Result<Vec<String>, String> {
    // pdf-extract panics on some malformed fonts.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("pdf-extract panicked".to_string()),
    }
}

fn lopdf_text(bytes: &[u8]) -> Result<(String, usize), String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let text = doc.extract_text(&pages).map_err(|e| e.to_string())?;
    Ok((text, pages.len()))
}

/// Extract text from PDF bytes, recording which tool succeeded.
pub fn extract_pdf_text(bytes: &[u8]) -> ResolvedText {
    let primary_err = match pdf_extract_pages(bytes) {
        Ok(pages) => {
            let text = pages.join("\n");
            return ResolvedText {
                diagnostic: TextDiagnostic {
                    tool: "pdf-extract".to_string(),
                    pages: Some(pages.len()),
                    chars: text.chars().count(),
                    error: None,
                },
                text,
            };
        }
        Err(e) => e,
    };

    match lopdf_text(bytes) {
        Ok((text, pages)) => ResolvedText {
            diagnostic: TextDiagnostic {
                tool: "lopdf".to_string(),
                pages: Some(pages),
                chars: text.chars().count(),
                error: Some(format!("pdf_extract_failed:{primary_err}")),
            },
            text,
        },
        Err(e) => {
            warn!(error = %e, "All PDF extractors failed");
            ResolvedText {
                text: String::new(),
                diagnostic: TextDiagnostic {
                    tool: "none".to_string(),
                    pages: None,
                    chars: 0,
                    error: Some(format!("extract_failed:{e}")),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eegdigest_common::PaperLinks;

    fn make_test_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });
        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn item(id: &str) -> CandidateItem {
        CandidateItem {
            item_id: id.to_string(),
            arxiv_id: format!("{id}v1"),
            version: 1,
            title: "t".to_string(),
            abstract_text: String::new(),
            authors: vec![],
            categories: vec![],
            published: Utc::now(),
            updated: Utc::now(),
            links: PaperLinks::default(),
        }
    }

    #[test]
    fn test_extract_digital_pdf() {
        let resolved = extract_pdf_text(&make_test_pdf("EEG foundation model"));
        assert!(resolved.text.contains("EEG foundation model"));
        assert!(resolved.diagnostic.tool == "pdf-extract" || resolved.diagnostic.tool == "lopdf");
        assert_eq!(resolved.diagnostic.pages, Some(1));
    }

    #[test]
    fn test_garbage_bytes_yield_empty_text() {
        let resolved = extract_pdf_text(b"definitely not a pdf");
        assert_eq!(resolved.text, "");
        assert_eq!(resolved.diagnostic.tool, "none");
        assert!(resolved.diagnostic.error.unwrap().starts_with("extract_failed:"));
    }

    #[tokio::test]
    async fn test_cached_text_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PdfTextResolver::new(dir.path(), RateGate::unlimited(), Duration::from_secs(1)).unwrap();
        let it = item("2501.00001");
        std::fs::create_dir_all(dir.path().join("text")).unwrap();
        std::fs::write(resolver.text_path(&it), "cached body").unwrap();

        let resolved = resolver.resolve(&it).await.unwrap();
        assert_eq!(resolved.text, "cached body");
        assert_eq!(resolved.diagnostic.tool, "cached");
        assert_eq!(resolved.diagnostic.chars, 11);
    }

    #[tokio::test]
    async fn test_pdf_on_disk_is_extracted_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PdfTextResolver::new(dir.path(), RateGate::unlimited(), Duration::from_secs(1)).unwrap();
        let it = item("2501.00002");
        std::fs::create_dir_all(dir.path().join("pdfs")).unwrap();
        std::fs::write(resolver.pdf_path(&it), make_test_pdf("Masked EEG modeling")).unwrap();

        let resolved = resolver.resolve(&it).await.unwrap();
        assert!(resolved.text.contains("Masked EEG modeling"));
        assert!(resolver.text_path(&it).exists());
    }

    #[tokio::test]
    async fn test_missing_link_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PdfTextResolver::new(dir.path(), RateGate::unlimited(), Duration::from_secs(1)).unwrap();
        let err = resolver.resolve(&item("2501.00003")).await.unwrap_err();
        assert!(err.to_string().contains("no pdf link"));
    }
}
