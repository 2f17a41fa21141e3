//! Reference data lookups for genes, diseases, evidence codes and tissue expression.
//!
//! The tables are loaded once from JSONL files in a lookup directory and then shared
//! read-only.  Pipeline code only sees the [`LookupData`] trait.

use std::{collections::HashMap, io::BufRead, path::Path};

use indexmap::IndexSet;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thousands::Separable;

use crate::common::open_read_maybe_gz;

/// Errors when looking up reference data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{kind} {id:?} not found")]
    NotFound { kind: &'static str, id: String },
}

/// Gene metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GeneRecord {
    /// Ensembl gene ID.
    pub id: String,
    pub approved_symbol: String,
    pub approved_name: String,
    #[serde(default)]
    pub symbol_synonyms: Vec<String>,
}

/// Disease ontology entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EfoRecord {
    pub id: String,
    pub label: String,
    /// Paths from the ontology roots to this code, each including the code itself.
    #[serde(default)]
    pub path_codes: Vec<Vec<String>>,
    #[serde(default)]
    pub therapeutic_area_codes: Vec<String>,
    #[serde(default)]
    pub therapeutic_area_labels: Vec<String>,
}

impl EfoRecord {
    /// The code itself followed by all codes on its paths, without duplicates.
    pub fn ancestors(&self) -> IndexSet<String> {
        std::iter::once(&self.id)
            .chain(self.path_codes.iter().flatten())
            .cloned()
            .collect()
    }
}

/// Evidence code ontology entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EcoRecord {
    pub id: String,
    pub label: String,
}

/// Expression of a gene in one tissue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TissueExpression {
    pub label: String,
    #[serde(default)]
    pub rna_level: i32,
    #[serde(default)]
    pub protein_level: i32,
}

/// Tissue expression of one gene.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HpaRecord {
    /// Ensembl gene ID.
    pub id: String,
    #[serde(default)]
    pub tissues: Vec<TissueExpression>,
}

impl HpaRecord {
    /// Labels of tissues with RNA or protein expression.
    pub fn expressed_tissues(&self) -> Vec<String> {
        self.tissues
            .iter()
            .filter(|tissue| tissue.rna_level > 0 || tissue.protein_level > 0)
            .map(|tissue| tissue.label.clone())
            .collect()
    }
}

/// Access to reference data.
pub trait LookupData: Send + Sync {
    fn get_gene(&self, id: &str) -> Result<GeneRecord, Error>;
    fn get_efo(&self, id: &str) -> Result<EfoRecord, Error>;
    fn get_eco(&self, id: &str) -> Result<EcoRecord, Error>;
    fn get_hpa(&self, id: &str) -> Result<HpaRecord, Error>;

    /// The disease and its ontology ancestors; just the disease if it is unknown.
    fn ancestors(&self, disease_id: &str) -> IndexSet<String> {
        match self.get_efo(disease_id) {
            Ok(record) => record.ancestors(),
            Err(_) => IndexSet::from([disease_id.to_string()]),
        }
    }
}

/// In-memory lookup tables.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    genes: HashMap<String, GeneRecord>,
    efo: HashMap<String, EfoRecord>,
    eco: HashMap<String, EcoRecord>,
    hpa: HashMap<String, HpaRecord>,
}

/// Load `<name>.jsonl.gz` or `<name>.jsonl` from `dir`, keyed by `key`.
fn load_table<T, F>(dir: &Path, name: &str, key: F) -> Result<HashMap<String, T>, anyhow::Error>
where
    T: DeserializeOwned,
    F: Fn(&T) -> String,
{
    let Some(path) = [format!("{}.jsonl.gz", name), format!("{}.jsonl", name)]
        .into_iter()
        .map(|file_name| dir.join(file_name))
        .find(|path| path.exists())
    else {
        tracing::warn!("no {} table in {:?}, using empty table", name, dir);
        return Ok(HashMap::new());
    };

    let mut result = HashMap::new();
    let reader = open_read_maybe_gz(&path)?;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line).map_err(|e| {
            anyhow::anyhow!("could not parse {:?} line {}: {}", &path, lineno + 1, e)
        })?;
        result.insert(key(&record), record);
    }
    tracing::info!(
        "  loaded {} {} records",
        result.len().separate_with_commas(),
        name
    );
    Ok(result)
}

impl LookupTables {
    /// Load all tables from the directory at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let dir = path.as_ref();
        tracing::info!("Loading lookup tables from {:?}...", dir);
        if !dir.is_dir() {
            anyhow::bail!("lookup directory {:?} does not exist", dir);
        }
        Ok(Self {
            genes: load_table(dir, "genes", |r: &GeneRecord| r.id.clone())?,
            efo: load_table(dir, "efo", |r: &EfoRecord| r.id.clone())?,
            eco: load_table(dir, "eco", |r: &EcoRecord| r.id.clone())?,
            hpa: load_table(dir, "hpa", |r: &HpaRecord| r.id.clone())?,
        })
    }

    /// Load from `path` if given, otherwise use empty tables.
    pub fn load_or_empty(path: Option<&str>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) => Self::load(shellexpand::tilde(path).to_string()),
            None => {
                tracing::warn!("no lookup directory given, metadata will be missing");
                Ok(Self::default())
            }
        }
    }

    pub fn insert_gene(&mut self, record: GeneRecord) {
        self.genes.insert(record.id.clone(), record);
    }

    pub fn insert_efo(&mut self, record: EfoRecord) {
        self.efo.insert(record.id.clone(), record);
    }

    pub fn insert_eco(&mut self, record: EcoRecord) {
        self.eco.insert(record.id.clone(), record);
    }

    pub fn insert_hpa(&mut self, record: HpaRecord) {
        self.hpa.insert(record.id.clone(), record);
    }
}

fn get_or_not_found<T: Clone>(
    table: &HashMap<String, T>,
    kind: &'static str,
    id: &str,
) -> Result<T, Error> {
    table.get(id).cloned().ok_or_else(|| Error::NotFound {
        kind,
        id: id.to_string(),
    })
}

impl LookupData for LookupTables {
    fn get_gene(&self, id: &str) -> Result<GeneRecord, Error> {
        get_or_not_found(&self.genes, "gene", id)
    }

    fn get_efo(&self, id: &str) -> Result<EfoRecord, Error> {
        get_or_not_found(&self.efo, "disease", id)
    }

    fn get_eco(&self, id: &str) -> Result<EcoRecord, Error> {
        get_or_not_found(&self.eco, "evidence code", id)
    }

    fn get_hpa(&self, id: &str) -> Result<HpaRecord, Error> {
        get_or_not_found(&self.hpa, "tissue expression", id)
    }
}
