//! Access to scored evidence by target.

use std::io::BufRead;

use indexmap::IndexMap;
use serde::Deserialize;
use thousands::Separable;

use crate::{common::open_read_maybe_gz, evidence::ds::Evidence};

/// Source of scored evidence, grouped by target.
pub trait EvidenceStore: Send + Sync {
    /// All targets with evidence, in a stable order.
    fn target_ids(&self) -> Vec<String>;

    /// All parseable evidence of the target; unknown targets have none.
    fn evidence_for_target(&self, target_id: &str) -> Result<Vec<Evidence>, anyhow::Error>;
}

#[derive(Deserialize)]
struct TargetOnly {
    target: TargetId,
}

#[derive(Deserialize)]
struct TargetId {
    id: String,
}

/// Evidence from JSONL files, kept as raw lines indexed by target.
///
/// Lines are only parsed into [`Evidence`] when their target is requested.
#[derive(Debug, Default, Clone)]
pub struct JsonlEvidenceStore {
    by_target: IndexMap<String, Vec<String>>,
    skipped: usize,
}

impl JsonlEvidenceStore {
    /// Index all lines of the files at `paths`.
    pub fn load(paths: &[String]) -> Result<Self, anyhow::Error> {
        let mut store = Self::default();
        for path in paths {
            tracing::info!("Indexing evidence from {}...", path);
            let reader = open_read_maybe_gz(path)?;
            for line in reader.lines() {
                store.insert_line(line?);
            }
        }
        tracing::info!(
            "... indexed evidence for {} targets, skipped {} lines",
            store.by_target.len().separate_with_commas(),
            store.skipped.separate_with_commas()
        );
        Ok(store)
    }

    /// Index lines given in memory.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::default();
        lines
            .into_iter()
            .for_each(|line| store.insert_line(line.into()));
        store
    }

    fn insert_line(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<TargetOnly>(&line) {
            Ok(record) => self.by_target.entry(record.target.id).or_default().push(line),
            Err(e) => {
                tracing::warn!("skipping evidence line without target: {}", e);
                self.skipped += 1;
            }
        }
    }

    /// Number of lines without a readable target.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl EvidenceStore for JsonlEvidenceStore {
    fn target_ids(&self) -> Vec<String> {
        self.by_target.keys().cloned().collect()
    }

    fn evidence_for_target(&self, target_id: &str) -> Result<Vec<Evidence>, anyhow::Error> {
        let Some(lines) = self.by_target.get(target_id) else {
            return Ok(Vec::new());
        };
        Ok(lines
            .iter()
            .filter_map(|line| match serde_json::from_str::<Evidence>(line) {
                Ok(evidence) => Some(evidence),
                Err(e) => {
                    tracing::error!("skipping malformed evidence of {}: {}", target_id, e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn line(id: &str, target: &str) -> String {
        json!({
            "id": id,
            "sourceID": "chembl",
            "type": "known_drug",
            "target": {"id": target},
            "disease": {"id": "EFO_0000756"},
            "scores": {"association_score": 0.5}
        })
        .to_string()
    }

    #[test]
    fn index_by_target() -> Result<(), anyhow::Error> {
        let store = JsonlEvidenceStore::from_lines([
            line("a", "ENSG00000000002"),
            line("b", "ENSG00000000001"),
            String::new(),
            "{\"no\": \"target\"}".to_string(),
            line("c", "ENSG00000000002"),
        ]);

        assert_eq!(
            store.target_ids(),
            vec!["ENSG00000000002", "ENSG00000000001"]
        );
        assert_eq!(store.skipped(), 1);
        let ids = store
            .evidence_for_target("ENSG00000000002")?
            .into_iter()
            .map(|e| e.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(store.evidence_for_target("ENSG00000000003")?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_evidence_is_skipped() -> Result<(), anyhow::Error> {
        let store = JsonlEvidenceStore::from_lines([
            line("a", "ENSG00000000001"),
            json!({"target": {"id": "ENSG00000000001"}, "type": "no_such_type"}).to_string(),
        ]);
        assert_eq!(store.evidence_for_target("ENSG00000000001")?.len(), 1);
        Ok(())
    }

    #[test]
    fn load_from_gz_file() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("evidence.jsonl.gz");
        {
            let mut f = crate::common::open_write_maybe_gz(&path)?;
            writeln!(f, "{}", line("a", "ENSG00000000001"))?;
            f.finish()?;
        }

        let store = JsonlEvidenceStore::load(&[path.display().to_string()])?;
        assert_eq!(store.target_ids(), vec!["ENSG00000000001"]);
        Ok(())
    }
}
