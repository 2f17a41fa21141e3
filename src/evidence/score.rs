//! Scoring of single evidence records onto `[0, 1]`.

use crate::{
    conf::Conf,
    normalise::{linear_rescale, pvalue_linear, PvalueRange},
};

use super::ds::{Evidence, EvidenceType, Payload, ResourceScore, ResourceScoreType};

/// Data sources with dedicated scoring rules.
pub mod sources {
    pub const EUROPEPMC: &str = "europepmc";
    pub const GWAS_CATALOG: &str = "gwas_catalog";
    pub const OT_GENETICS_PORTAL: &str = "ot_genetics_portal";
    pub const PHEWAS_CATALOG: &str = "phewas_catalog";
    pub const SYSBIO: &str = "sysbio";
    pub const TWENTYTHREEANDME: &str = "twentythreeandme";
}

/// Sample size at which GWAS catalog evidence gets full weight.
const GWAS_MAX_SAMPLE_SIZE: f64 = 5000.0;

/// Errors when scoring one evidence.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("malformed {evidence_type} evidence: {message}")]
    Malformed {
        evidence_type: EvidenceType,
        message: String,
    },
    #[error("{evidence_type} evidence lacks {field}")]
    MissingField {
        evidence_type: EvidenceType,
        field: &'static str,
    },
    #[error("ot_genetics_portal evidence lacks gene2variant.resource_score.value")]
    MissingGeneToVariantScore,
    #[error("score is not a finite number: {0}")]
    NonFinite(f64),
}

impl Error {
    /// Whether the error indicates an upstream data problem that must fail the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MissingGeneToVariantScore)
    }
}

/// Result of scoring one evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// The final association score.
    Scored(f64),
    /// The score was below the minimum configured for the data source.
    BelowMinimum { score: f64, min_score: f64 },
}

/// Maximal number of cases and p-value range of PheWAS-like sources.
fn phewas_params(source_id: &str) -> Option<(f64, PvalueRange)> {
    match source_id {
        sources::PHEWAS_CATALOG => Some((8800.0, PvalueRange::new(0.05, 1e-25))),
        sources::TWENTYTHREEANDME => Some((297_901.0, PvalueRange::new(0.05, 1e-30))),
        _ => None,
    }
}

/// Score of PheWAS catalog and 23andMe evidence from p-value and number of cases.
pub fn phewas_score(source_id: &str, pvalue: f64, cases: f64) -> Option<f64> {
    let (max_cases, range) = phewas_params(source_id)?;
    let normalized_p = pvalue_linear(pvalue, range);
    let normalized_cases = linear_rescale(cases, (0.0, max_cases), (0.0, 1.0), true);
    Some(normalized_p * normalized_cases)
}

/// Score of GWAS catalog evidence.
pub fn gwascatalog_score(pvalue: f64, sample_size: f64, g2v_score: f64, r2: f64) -> f64 {
    let normalized_p = pvalue_linear(pvalue, PvalueRange::new(1.0, 1e-15));
    let normalized_n = linear_rescale(sample_size, (0.0, GWAS_MAX_SAMPLE_SIZE), (0.0, 1.0), true);
    normalized_p * normalized_n * g2v_score * r2
}

/// The value itself, or its `pvalue_linear` transform for p-values.
fn probability_or_pvalue(score: &ResourceScore) -> f64 {
    match score.kind {
        ResourceScoreType::Pvalue => pvalue_linear(score.value, PvalueRange::default()),
        ResourceScoreType::Probability | ResourceScoreType::Other => score.value,
    }
}

/// Scores evidence according to its type and the configuration of its data source.
#[derive(Debug, Clone, Copy)]
pub struct EvidenceScorer<'a> {
    conf: &'a Conf,
}

impl<'a> EvidenceScorer<'a> {
    pub fn new(conf: &'a Conf) -> Self {
        Self { conf }
    }

    /// The type-specific score, before minimum, weight and normaliser are applied.
    pub fn raw_score(&self, evidence: &Evidence) -> Result<f64, Error> {
        let evidence_type = evidence.evidence_type;
        let missing = |field: &'static str| Error::MissingField {
            evidence_type,
            field,
        };
        let payload = Payload::from_evidence(evidence).map_err(|e| Error::Malformed {
            evidence_type,
            message: e.to_string(),
        })?;
        let source_id = evidence.source_id.as_str();

        let score = match payload {
            Payload::KnownDrug(payload) => {
                payload.drug2clinic.resource_score.value * payload.target2drug.resource_score.value
            }
            Payload::RnaExpression(payload) => {
                let pvalue_score =
                    pvalue_linear(payload.resource_score.value, PvalueRange::default());
                let fold_scale = payload.log2_fold_change.value.abs() / 10.0;
                let rank = payload.log2_fold_change.percentile_rank / 100.0;
                (pvalue_score * fold_scale * rank).min(1.0)
            }
            Payload::GeneticAssociation(payload) => match &payload.gene2variant {
                Some(g2v) => {
                    if phewas_params(source_id).is_some() {
                        let v2d = payload
                            .variant2disease
                            .as_ref()
                            .ok_or_else(|| missing("variant2disease"))?;
                        let cases = evidence
                            .unique_number("cases")
                            .ok_or_else(|| missing("unique_association_fields.cases"))?;
                        phewas_score(source_id, v2d.resource_score.value, cases)
                            .ok_or_else(|| missing("phewas parameters"))?
                    } else if source_id == sources::OT_GENETICS_PORTAL {
                        g2v.resource_score
                            .ok_or(Error::MissingGeneToVariantScore)?
                            .value
                    } else {
                        let g2v_score = g2v
                            .resource_score
                            .ok_or_else(|| missing("gene2variant.resource_score"))?
                            .value;
                        let v2d = payload
                            .variant2disease
                            .as_ref()
                            .ok_or_else(|| missing("variant2disease"))?;
                        if source_id == sources::GWAS_CATALOG {
                            let sample_size = v2d
                                .gwas_sample_size
                                .ok_or_else(|| missing("variant2disease.gwas_sample_size"))?;
                            let r2 = evidence.unique_number("r2").unwrap_or(1.0);
                            gwascatalog_score(v2d.resource_score.value, sample_size, g2v_score, r2)
                        } else {
                            g2v_score * probability_or_pvalue(&v2d.resource_score)
                        }
                    }
                }
                None => probability_or_pvalue(
                    payload
                        .resource_score
                        .as_ref()
                        .ok_or_else(|| missing("resource_score"))?,
                ),
            },
            Payload::AnimalModel(payload) => payload.disease_model_association.resource_score.value,
            Payload::SomaticMutation(payload) => match payload.resource_score.kind {
                ResourceScoreType::Pvalue => pvalue_linear(
                    payload.resource_score.value,
                    PvalueRange {
                        range_min: 0.1,
                        out_min: 0.25,
                        ..Default::default()
                    },
                ),
                _ => payload.resource_score.value,
            },
            Payload::Literature(payload) => {
                let score = payload.resource_score.value;
                if source_id == sources::EUROPEPMC {
                    (score / 100.0).min(1.0)
                } else {
                    score
                }
            }
            Payload::AffectedPathway(payload) => {
                if source_id == sources::SYSBIO {
                    payload.resource_score.value
                } else if payload.resource_score.kind == ResourceScoreType::Pvalue {
                    pvalue_linear(
                        payload.resource_score.value,
                        PvalueRange::new(1e-4, 1e-14).with_out(0.5, 1.0),
                    )
                } else {
                    payload.resource_score.value
                }
            }
        };

        if score.is_finite() {
            Ok(score)
        } else {
            Err(Error::NonFinite(score))
        }
    }

    /// Score `evidence`, applying the minimum, weight and normaliser of its data source.
    pub fn score(&self, evidence: &Evidence) -> Result<Outcome, Error> {
        let mut score = self.raw_score(evidence)?;

        if let Some(datasource) = self.conf.datasource(&evidence.source_id) {
            if let Some(min_score) = datasource.min_score {
                if score < min_score {
                    return Ok(Outcome::BelowMinimum { score, min_score });
                }
            }
            if let Some(weight) = datasource.weight {
                score = (score * weight).min(1.0);
            }
            if let Some(normaliser) = &datasource.normaliser {
                score = normaliser.apply(score);
            }
        }

        Ok(Outcome::Scored(score.clamp(0.0, 1.0)))
    }

    /// Score `evidence` and store the result in `scores.association_score`.
    pub fn score_in_place(&self, evidence: &mut Evidence) -> Result<Outcome, Error> {
        let outcome = self.score(evidence)?;
        if let Outcome::Scored(score) = outcome {
            evidence.scores.association_score = score;
        }
        Ok(outcome)
    }
}
