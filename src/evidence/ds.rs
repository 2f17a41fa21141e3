//! Data structures for evidence records.
//!
//! An [`Evidence`] keeps its type-specific `evidence` object as raw JSON so that records
//! are re-emitted without loss.  The scorer works on the typed view obtained through
//! [`Payload::from_evidence`], one variant per evidence type.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

/// The closed set of evidence types, also used as data types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvidenceType {
    KnownDrug,
    RnaExpression,
    GeneticAssociation,
    AnimalModel,
    SomaticMutation,
    Literature,
    AffectedPathway,
}

/// Gene metadata injected into targets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GeneInfo {
    /// Approved gene symbol.
    pub symbol: String,
    /// Approved gene name.
    pub name: String,
}

/// Therapeutic areas of a disease.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TherapeuticArea {
    pub codes: Vec<String>,
    pub labels: Vec<String>,
}

/// Disease metadata injected into diseases.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EfoInfo {
    pub label: String,
    /// Paths from the ontology roots to the disease.
    pub path: Vec<Vec<String>>,
    pub therapeutic_area: TherapeuticArea,
}

/// The target of an evidence.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Target {
    /// Ensembl gene ID.
    pub id: String,
    pub gene_info: Option<GeneInfo>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// The disease of an evidence.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Disease {
    /// Ontology code, e.g., `EFO_0000270`.
    pub id: String,
    pub efo_info: Option<EfoInfo>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// One literature reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reference {
    pub lit_id: String,
}

/// Literature references of an evidence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Literature {
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Computed scores of an evidence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Scores {
    #[serde(default)]
    pub association_score: f64,
}

/// One evidence record.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Evidence {
    /// Stable identifier, generated by the fixer if missing.
    #[serde(default)]
    pub id: String,
    /// The data source.
    #[serde(rename = "sourceID")]
    pub source_id: String,
    /// The evidence type.
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    pub target: Target,
    pub disease: Disease,
    /// Type-specific evidence object.
    #[serde(default)]
    pub evidence: Value,
    #[serde(default)]
    pub unique_association_fields: IndexMap<String, Value>,
    pub literature: Option<Literature>,
    #[serde(default)]
    pub scores: Scores,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Evidence {
    /// Numeric value from `unique_association_fields`, accepting numeric strings.
    pub fn unique_number(&self, key: &str) -> Option<f64> {
        match self.unique_association_fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Literature reference IDs of the evidence.
    pub fn literature_ids(&self) -> impl Iterator<Item = &str> {
        self.literature
            .iter()
            .flat_map(|lit| lit.references.iter())
            .map(|reference| reference.lit_id.as_str())
    }
}

/// The kind of a resource score value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScoreType {
    Probability,
    Pvalue,
    /// Any other kind, used as a plain value.
    #[default]
    #[serde(other)]
    Other,
}

/// A raw score as reported by the data source.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ResourceScore {
    #[serde(rename = "type", default)]
    pub kind: ResourceScoreType,
    pub value: f64,
}

/// Wrapper for sub-structures that only carry a resource score.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub resource_score: ResourceScore,
}

/// Payload of `known_drug` evidence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct KnownDrug {
    pub drug2clinic: Scored,
    pub target2drug: Scored,
}

/// Log2 fold change of an expression experiment.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Log2FoldChange {
    pub value: f64,
    /// Percentile rank of the fold change within the experiment, 0..=100.
    pub percentile_rank: f64,
}

/// Payload of `rna_expression` evidence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RnaExpression {
    pub resource_score: ResourceScore,
    pub log2_fold_change: Log2FoldChange,
}

/// Gene to variant link of genetic association evidence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GeneToVariant {
    pub resource_score: Option<ResourceScore>,
}

/// Variant to disease link of genetic association evidence.
#[serde_as]
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct VariantToDisease {
    pub resource_score: ResourceScore,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub gwas_sample_size: Option<f64>,
}

/// Payload of `genetic_association` evidence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GeneticAssociation {
    pub gene2variant: Option<GeneToVariant>,
    pub variant2disease: Option<VariantToDisease>,
    /// Used when there is no gene to variant link.
    pub resource_score: Option<ResourceScore>,
}

/// Payload of `animal_model` evidence.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AnimalModel {
    pub disease_model_association: Scored,
}

/// Payload of evidence types that carry a single resource score.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Plain {
    pub resource_score: ResourceScore,
}

/// Typed view on the `evidence` object, one variant per [`EvidenceType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    KnownDrug(KnownDrug),
    RnaExpression(RnaExpression),
    GeneticAssociation(GeneticAssociation),
    AnimalModel(AnimalModel),
    SomaticMutation(Plain),
    Literature(Plain),
    AffectedPathway(Plain),
}

impl Payload {
    /// Interpret the `evidence` object according to the evidence type.
    pub fn from_evidence(evidence: &Evidence) -> Result<Self, serde_json::Error> {
        let raw = &evidence.evidence;
        Ok(match evidence.evidence_type {
            EvidenceType::KnownDrug => Payload::KnownDrug(KnownDrug::deserialize(raw)?),
            EvidenceType::RnaExpression => {
                Payload::RnaExpression(RnaExpression::deserialize(raw)?)
            }
            EvidenceType::GeneticAssociation => {
                Payload::GeneticAssociation(GeneticAssociation::deserialize(raw)?)
            }
            EvidenceType::AnimalModel => Payload::AnimalModel(AnimalModel::deserialize(raw)?),
            EvidenceType::SomaticMutation => Payload::SomaticMutation(Plain::deserialize(raw)?),
            EvidenceType::Literature => Payload::Literature(Plain::deserialize(raw)?),
            EvidenceType::AffectedPathway => Payload::AffectedPathway(Plain::deserialize(raw)?),
        })
    }
}
