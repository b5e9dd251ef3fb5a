//! Run artifacts under `<output_dir>/<YYYY-MM>/`.
//!
//!   arxiv_raw.json  candidates as fetched
//!   triage.jsonl    one classification per line, candidate order
//!   papers.jsonl    one summary per line, selection order
//!   digest.json     run metadata, stats and merged per-item records
//!
//! Each file is written to a `.part` sibling and renamed into place.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use eegdigest_common::DigestRecord;
use eegdigest_enrich::{RunOutput, RunStats};

/// Models and settings that produced a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub month: String,
    pub generated_at: DateTime<Utc>,
    pub backend: String,
    pub triage_model: String,
    pub summary_model: String,
    pub include_borderline: bool,
    pub force: bool,
    pub no_pdf: bool,
}

#[derive(Serialize)]
struct DigestDocument<'a> {
    run_id: Uuid,
    #[serde(flatten)]
    meta: &'a RunMeta,
    stats: &'a RunStats,
    records: &'a [DigestRecord],
}

pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: &Path, month: &str) -> Self {
        Self { dir: output_dir.join(month) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_run(&self, output: &RunOutput, meta: &RunMeta) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;

        self.write_json("arxiv_raw.json", &output.candidates)?;
        self.write_jsonl("triage.jsonl", &output.triage)?;
        self.write_jsonl("papers.jsonl", &output.summaries)?;
        self.write_json(
            "digest.json",
            &DigestDocument { run_id: output.run_id, meta, stats: &output.stats, records: &output.records },
        )?;

        info!(
            dir = %self.dir.display(),
            records = output.records.len(),
            summaries = output.summaries.len(),
            "Artifacts written"
        );
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        self.write_atomic(name, |w| {
            serde_json::to_writer_pretty(&mut *w, value)?;
            writeln!(w)?;
            Ok(())
        })
    }

    fn write_jsonl<T: Serialize>(&self, name: &str, rows: &[T]) -> anyhow::Result<()> {
        self.write_atomic(name, |w| {
            for row in rows {
                serde_json::to_writer(&mut *w, row)?;
                writeln!(w)?;
            }
            Ok(())
        })
    }

    fn write_atomic<F>(&self, name: &str, fill: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut BufWriter<fs::File>) -> anyhow::Result<()>,
    {
        let path = self.dir.join(name);
        let part = self.dir.join(format!("{name}.part"));
        let file = fs::File::create(&part).with_context(|| format!("creating {}", part.display()))?;
        let mut writer = BufWriter::new(file);
        fill(&mut writer).with_context(|| format!("writing {}", part.display()))?;
        writer.flush()?;
        fs::rename(&part, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eegdigest_common::{ClassificationResult, Decision, ItemState};
    use eegdigest_test_utils::candidate;
    use pretty_assertions::assert_eq;

    fn output() -> RunOutput {
        let paper = candidate("2501.00007", "SeizureFM", 7);
        let triage = ClassificationResult {
            item_id: paper.item_id.clone(),
            decision: Decision::Reject,
            confidence: 0.7,
            reasons: vec!["no eeg".to_string()],
        };
        RunOutput {
            run_id: Uuid::new_v4(),
            candidates: vec![paper.clone()],
            triage: vec![triage.clone()],
            summaries: vec![],
            records: vec![DigestRecord {
                paper,
                triage,
                summary: None,
                text: None,
                state: ItemState::Rejected,
                skip_reason: None,
            }],
            stats: RunStats { candidates: 1, rejected: 1, ..Default::default() },
        }
    }

    fn meta() -> RunMeta {
        RunMeta {
            month: "2025-01".to_string(),
            generated_at: Utc::now(),
            backend: "gemini".to_string(),
            triage_model: "t".to_string(),
            summary_model: "s".to_string(),
            include_borderline: false,
            force: false,
            no_pdf: true,
        }
    }

    #[test]
    fn test_write_run_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path(), "2025-01");
        writer.write_run(&output(), &meta()).unwrap();

        let dir = tmp.path().join("2025-01");
        let triage = fs::read_to_string(dir.join("triage.jsonl")).unwrap();
        assert_eq!(triage.lines().count(), 1);
        let row: serde_json::Value = serde_json::from_str(triage.lines().next().unwrap()).unwrap();
        assert_eq!(row["arxiv_id_base"], "2501.00007");
        assert_eq!(row["decision"], "reject");

        assert_eq!(fs::read_to_string(dir.join("papers.jsonl")).unwrap(), "");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("arxiv_raw.json")).unwrap()).unwrap();
        assert_eq!(raw[0]["summary"], "We study SeizureFM on large EEG corpora.");

        let digest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("digest.json")).unwrap()).unwrap();
        assert_eq!(digest["month"], "2025-01");
        assert_eq!(digest["no_pdf"], true);
        assert_eq!(digest["stats"]["rejected"], 1);
        assert_eq!(digest["records"][0]["state"], "rejected");

        let leftovers = fs::read_dir(&dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_rewrite_replaces_previous_run() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path(), "2025-01");
        writer.write_run(&output(), &meta()).unwrap();
        writer.write_run(&output(), &meta()).unwrap();
        let triage = fs::read_to_string(writer.dir().join("triage.jsonl")).unwrap();
        assert_eq!(triage.lines().count(), 1);
    }
}
