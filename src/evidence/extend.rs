//! Injection of gene, disease and evidence code metadata into scored evidence.

use indexmap::IndexSet;
use serde_json::{json, Value};

use crate::lookup::{EfoRecord, GeneRecord, LookupData};

use super::ds::{EfoInfo, Evidence, GeneInfo, TherapeuticArea};

impl From<&GeneRecord> for GeneInfo {
    fn from(record: &GeneRecord) -> Self {
        Self {
            symbol: record.approved_symbol.clone(),
            name: record.approved_name.clone(),
        }
    }
}

impl From<&EfoRecord> for EfoInfo {
    fn from(record: &EfoRecord) -> Self {
        Self {
            label: record.label.clone(),
            path: record.path_codes.clone(),
            therapeutic_area: TherapeuticArea {
                codes: record.therapeutic_area_codes.clone(),
                labels: record.therapeutic_area_labels.clone(),
            },
        }
    }
}

/// All strings in `evidence_codes` arrays of `value`, in order of appearance.
fn collect_evidence_codes(value: &Value, codes: &mut IndexSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("evidence_codes", Value::Array(values)) => codes.extend(
                        values
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| s.to_string()),
                    ),
                    _ => collect_evidence_codes(child, codes),
                }
            }
        }
        Value::Array(values) => values
            .iter()
            .for_each(|child| collect_evidence_codes(child, codes)),
        _ => (),
    }
}

/// Inject metadata into `evidence`, returning the number of failed lookups.
///
/// Failed lookups are logged and the corresponding field is left out.  The score is not
/// touched.
pub fn extend(evidence: &mut Evidence, lookup: &dyn LookupData) -> usize {
    let mut misses = 0;

    match lookup.get_gene(&evidence.target.id) {
        Ok(record) => evidence.target.gene_info = Some(GeneInfo::from(&record)),
        Err(e) => {
            tracing::error!("evidence {}: {}", &evidence.id, e);
            misses += 1;
        }
    }

    match lookup.get_efo(&evidence.disease.id) {
        Ok(record) => evidence.disease.efo_info = Some(EfoInfo::from(&record)),
        Err(e) => {
            tracing::error!("evidence {}: {}", &evidence.id, e);
            misses += 1;
        }
    }

    let mut codes = IndexSet::new();
    collect_evidence_codes(&evidence.evidence, &mut codes);
    let mut codes_info = Vec::new();
    for code in &codes {
        match lookup.get_eco(code) {
            Ok(record) => codes_info.push(json!([{"eco_id": record.id, "label": record.label}])),
            Err(e) => {
                tracing::error!("evidence {}: {}", &evidence.id, e);
                misses += 1;
            }
        }
    }
    if !codes_info.is_empty() {
        if let Value::Object(map) = &mut evidence.evidence {
            map.insert("evidence_codes_info".to_string(), Value::Array(codes_info));
        }
    }

    misses
}
