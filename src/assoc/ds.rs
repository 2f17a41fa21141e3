//! Data structures for association scoring and the association documents.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::evidence::ds::{EfoInfo, EvidenceType, GeneInfo};

/// Score of one evidence as input to aggregation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvidenceScore {
    pub score: f64,
    pub datatype: EvidenceType,
    pub datasource: String,
    /// Whether the evidence names the disease itself rather than a descendant.
    pub is_direct: bool,
}

/// Number of contributing evidence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EvidenceCount {
    pub total: usize,
    pub datatypes: BTreeMap<String, usize>,
    pub datasources: BTreeMap<String, usize>,
}

/// Scores of one scoring method.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScoreSet {
    pub datasources: BTreeMap<String, f64>,
    pub datatypes: BTreeMap<String, f64>,
    pub overall: f64,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AssociationTarget {
    pub id: String,
    pub gene_info: Option<GeneInfo>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AssociationDisease {
    pub id: String,
    pub efo_info: Option<EfoInfo>,
}

/// Search facets of an association.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Facets {
    pub datatype: Vec<String>,
    pub datasource: Vec<String>,
    pub free_text_search: Vec<String>,
    pub expression_tissues: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Private {
    pub facets: Facets,
}

/// The aggregated relation of one target and one disease.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Association {
    /// `"{target}-{disease}"`
    pub id: String,
    pub target: AssociationTarget,
    pub disease: AssociationDisease,
    pub is_direct: bool,
    pub evidence_count: EvidenceCount,
    /// Scores by scoring method name.
    #[serde(flatten)]
    pub scores: IndexMap<String, ScoreSet>,
    pub private: Private,
}

impl Association {
    pub fn new(target_id: &str, disease_id: &str) -> Self {
        Self {
            id: format!("{}-{}", target_id, disease_id),
            target: AssociationTarget {
                id: target_id.to_string(),
                ..Default::default()
            },
            disease: AssociationDisease {
                id: disease_id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether no evidence contributed; empty associations must not be stored.
    pub fn is_empty(&self) -> bool {
        self.scores.values().all(|scores| scores.overall == 0.0)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn association_document_shape() -> Result<(), anyhow::Error> {
        let mut assoc = Association::new("ENSG00000157764", "EFO_0000756");
        assert!(assoc.is_empty());

        assoc.scores.insert(
            "harmonic-sum".into(),
            ScoreSet {
                datasources: BTreeMap::from([("chembl".to_string(), 0.91)]),
                datatypes: BTreeMap::from([("known_drug".to_string(), 0.91)]),
                overall: 0.91,
            },
        );
        assert!(!assoc.is_empty());

        let value = serde_json::to_value(&assoc)?;
        assert_eq!(value["id"], json!("ENSG00000157764-EFO_0000756"));
        assert_eq!(value["harmonic-sum"]["overall"], json!(0.91));
        assert_eq!(value["target"], json!({"id": "ENSG00000157764"}));
        assert_eq!(
            value["private"]["facets"]["expression_tissues"],
            json!([])
        );

        let parsed: Association = serde_json::from_value(value)?;
        assert_eq!(parsed, assoc);
        Ok(())
    }
}
