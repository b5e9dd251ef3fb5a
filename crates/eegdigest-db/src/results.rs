//! Cached stage results (triage and summaries), one JSON payload per item.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use eegdigest_common::{CacheKind, ResultCache};

use crate::database::{Database, TABLE_SUMMARIES, TABLE_TRIAGE};
use crate::error::Result;

fn table(kind: CacheKind) -> &'static str {
    match kind {
        CacheKind::Triage  => TABLE_TRIAGE,
        CacheKind::Summary => TABLE_SUMMARIES,
    }
}

impl Database {
    pub fn get_result(&self, kind: CacheKind, item_id: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let sql = format!("SELECT payload FROM {} WHERE arxiv_id_base = ?1", table(kind));
        let payload: Option<String> = conn
            .query_row(&sql, params![item_id], |row| row.get(0))
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    pub fn put_result(&self, kind: CacheKind, item_id: &str, value: &Value) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} (arxiv_id_base, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(arxiv_id_base) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            table(kind)
        );
        conn.execute(&sql, params![item_id, serde_json::to_string(value)?, Utc::now().to_rfc3339()])?;
        Ok(())
    }
}

impl ResultCache for Database {
    fn get(&self, kind: CacheKind, item_id: &str) -> eegdigest_common::Result<Option<Value>> {
        Ok(self.get_result(kind, item_id)?)
    }

    fn put(&self, kind: CacheKind, item_id: &str, value: &Value) -> eegdigest_common::Result<()> {
        Ok(self.put_result(kind, item_id, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegdigest_common::{cache_decision, CacheDecision, ClassificationResult};
    use serde_json::json;

    #[test]
    fn test_kinds_are_separate_tables() {
        let db = Database::in_memory().unwrap();
        db.put(CacheKind::Triage, "2501.00001", &json!({"decision": "accept"})).unwrap();
        assert!(db.get(CacheKind::Triage, "2501.00001").unwrap().is_some());
        assert!(db.get(CacheKind::Summary, "2501.00001").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let db = Database::in_memory().unwrap();
        db.put(CacheKind::Summary, "x", &json!({"v": 1})).unwrap();
        db.put(CacheKind::Summary, "x", &json!({"v": 2})).unwrap();
        assert_eq!(db.get(CacheKind::Summary, "x").unwrap().unwrap()["v"], 2);
    }

    #[test]
    fn test_legacy_scalar_reasons_coerced_on_read() {
        let db = Database::in_memory().unwrap();
        db.put(
            CacheKind::Triage,
            "2501.00001",
            &json!({"arxiv_id_base": "2501.00001", "decision": "borderline", "confidence": 0.5, "reasons": "eeg only"}),
        )
        .unwrap();
        let cached = db.get(CacheKind::Triage, "2501.00001").unwrap();
        match cache_decision::<ClassificationResult>(cached, false) {
            CacheDecision::Reuse(t) => assert_eq!(t.reasons, vec!["eeg only".to_string()]),
            CacheDecision::Fresh => panic!("expected cached row to be reused"),
        }
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        Database::open(&path).unwrap().put(CacheKind::Triage, "a", &json!({"k": true})).unwrap();
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get(CacheKind::Triage, "a").unwrap(), Some(json!({"k": true})));
    }
}
