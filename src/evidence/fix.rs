//! Identifier normalisation and validation of evidence before scoring.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::ds::Evidence;

lazy_static::lazy_static! {
    static ref RE_TARGET_ID: Regex = Regex::new(r"^ENSG\d+$").expect("invalid regex in source code");
    static ref RE_ONTOLOGY_ID: Regex =
        Regex::new(r"^[A-Za-z]+_[A-Za-z0-9]+$").expect("invalid regex in source code");
}

/// Reasons for rejecting an evidence record.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("could not parse evidence: {0}")]
    Parse(String),
    #[error("missing sourceID")]
    MissingSourceId,
    #[error("invalid target id {0:?}")]
    InvalidTargetId(String),
    #[error("invalid disease id {0:?}")]
    InvalidDiseaseId(String),
}

/// Strip URL prefixes such as `http://identifiers.org/ensembl/`.
fn strip_url(raw: &str) -> &str {
    raw.trim()
        .rsplit(|c: char| c == '/' || c == '#')
        .next()
        .unwrap_or_default()
}

/// Normalise an ontology code to the `PREFIX_CODE` form.
pub fn normalise_ontology_id(raw: &str) -> String {
    strip_url(raw).replacen(':', "_", 1)
}

/// Normalise an Ensembl gene ID.
pub fn normalise_target_id(raw: &str) -> String {
    strip_url(raw).to_string()
}

/// Normalise all strings in `evidence_codes` arrays, at any depth.
fn normalise_evidence_codes(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "evidence_codes" {
                    if let Value::Array(codes) = child {
                        for code in codes.iter_mut() {
                            if let Value::String(s) = code {
                                *s = normalise_ontology_id(s);
                            }
                        }
                        continue;
                    }
                }
                normalise_evidence_codes(child);
            }
        }
        Value::Array(values) => values.iter_mut().for_each(normalise_evidence_codes),
        _ => (),
    }
}

/// Stable ID from source, target, disease and the unique association fields.
pub fn stable_id(evidence: &Evidence) -> String {
    let unique_fields = evidence
        .unique_association_fields
        .iter()
        .collect::<BTreeMap<_, _>>();
    let unique_fields = serde_json::to_string(&unique_fields).unwrap_or_default();

    let mut hasher = Sha256::new();
    for part in [
        evidence.source_id.as_str(),
        evidence.target.id.as_str(),
        evidence.disease.id.as_str(),
        unique_fields.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    base16ct::lower::encode_string(&hasher.finalize())
}

/// Normalise identifiers of `evidence` and check that it can be scored.
pub fn fix(mut evidence: Evidence) -> Result<Evidence, Error> {
    evidence.source_id = evidence.source_id.trim().to_lowercase();
    if evidence.source_id.is_empty() {
        return Err(Error::MissingSourceId);
    }

    evidence.target.id = normalise_target_id(&evidence.target.id);
    if !RE_TARGET_ID.is_match(&evidence.target.id) {
        return Err(Error::InvalidTargetId(evidence.target.id));
    }

    evidence.disease.id = normalise_ontology_id(&evidence.disease.id);
    if !RE_ONTOLOGY_ID.is_match(&evidence.disease.id) {
        return Err(Error::InvalidDiseaseId(evidence.disease.id));
    }

    normalise_evidence_codes(&mut evidence.evidence);

    if evidence.id.trim().is_empty() {
        evidence.id = stable_id(&evidence);
    }

    Ok(evidence)
}

/// Parse one JSON line into evidence, without fixing it.
pub fn parse(line: &str) -> Result<Evidence, Error> {
    serde_json::from_str(line).map_err(|e| Error::Parse(e.to_string()))
}

/// Parse one JSON line and fix the resulting evidence.
pub fn parse_and_fix(line: &str) -> Result<Evidence, Error> {
    fix(parse(line)?)
}
