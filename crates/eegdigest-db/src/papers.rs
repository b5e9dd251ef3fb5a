//! Candidate paper rows.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use eegdigest_common::CandidateItem;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert or replace the candidates of one run month. Returns rows written.
    pub fn upsert_papers(&self, month: &str, papers: &[CandidateItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO papers (arxiv_id_base, arxiv_id, version, title, published, month, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(arxiv_id_base) DO UPDATE SET
                    arxiv_id = excluded.arxiv_id,
                    version = excluded.version,
                    title = excluded.title,
                    published = excluded.published,
                    month = excluded.month,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
            )?;
            for paper in papers {
                stmt.execute(params![
                    paper.item_id,
                    paper.arxiv_id,
                    paper.version,
                    paper.title,
                    paper.published.to_rfc3339(),
                    month,
                    serde_json::to_string(paper)?,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(papers.len())
    }

    pub fn get_paper(&self, item_id: &str) -> Result<Option<CandidateItem>> {
        let conn = self.conn()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM papers WHERE arxiv_id_base = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    pub fn papers_for_month(&self, month: &str) -> Result<Vec<CandidateItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM papers WHERE month = ?1 ORDER BY published, arxiv_id_base",
        )?;
        let rows = stmt.query_map(params![month], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }

    pub fn paper_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
