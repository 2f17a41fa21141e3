//! Building of association documents from evidence scores.

use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use lru::LruCache;

use crate::{
    conf::Conf,
    evidence::ds::{EfoInfo, EvidenceType, GeneInfo},
    lookup::{GeneRecord, LookupData},
};

use super::{
    ds::{Association, EvidenceScore, ScoreSet},
    harmonic::HarmonicSumScorer,
};

/// Computes the layered harmonic sums of one (target, disease) pair.
#[derive(Debug, Clone)]
pub struct AssociationBuilder<'a> {
    conf: &'a Conf,
    datatypes: IndexSet<EvidenceType>,
}

impl<'a> AssociationBuilder<'a> {
    pub fn new(conf: &'a Conf) -> Self {
        Self {
            conf,
            datatypes: conf.datatypes(),
        }
    }

    /// Aggregate `scores` into an association.
    ///
    /// Only evidence of configured data sources is counted; all evidence is scored.
    pub fn build(&self, target_id: &str, disease_id: &str, scores: &[EvidenceScore]) -> Association {
        let scoring = &self.conf.scoring;
        let mut assoc = Association::new(target_id, disease_id);
        assoc.is_direct = scores.iter().any(|score| score.is_direct);

        // Unknown sources may carry evidence of several types, one scorer per pair.
        let mut per_source: BTreeMap<(&str, EvidenceType), HarmonicSumScorer> = BTreeMap::new();
        for score in scores {
            if self.conf.datasource(&score.datasource).is_some()
                && self.datatypes.contains(&score.datatype)
            {
                let count = &mut assoc.evidence_count;
                count.total += 1;
                *count
                    .datatypes
                    .entry(score.datatype.to_string())
                    .or_default() += 1;
                *count
                    .datasources
                    .entry(score.datasource.clone())
                    .or_default() += 1;
            }

            per_source
                .entry((score.datasource.as_str(), score.datatype))
                .or_insert_with(|| HarmonicSumScorer::new(scoring.buffer))
                .add(score.score);
        }

        let mut score_set = ScoreSet::default();
        let mut per_datatype: BTreeMap<EvidenceType, HarmonicSumScorer> = BTreeMap::new();
        let mut overall = HarmonicSumScorer::new(scoring.buffer);
        for ((datasource, datatype), scorer) in per_source {
            let datasource_score =
                scorer.score(scoring.datasource_scale_factor, Some(scoring.datasource_cap));
            let reported = score_set
                .datasources
                .entry(datasource.to_string())
                .or_insert(0.0);
            *reported = reported.max(datasource_score);
            per_datatype
                .entry(datatype)
                .or_insert_with(|| HarmonicSumScorer::new(scoring.buffer))
                .add(datasource_score);
            overall.add(datasource_score);
        }
        score_set.datatypes = per_datatype
            .into_iter()
            .map(|(datatype, scorer)| {
                (
                    datatype.to_string(),
                    scorer.score(scoring.datatype_scale_factor, None),
                )
            })
            .collect();
        score_set.overall = overall.score(scoring.overall_scale_factor, None);

        assoc.scores.insert(scoring.method.clone(), score_set);
        assoc
    }
}

/// Target metadata as cached by [`Enricher`].
#[derive(Debug, Clone, Default)]
struct TargetMeta {
    gene: Option<GeneRecord>,
    expressed_tissues: Vec<String>,
}

/// Adds gene, disease and tissue metadata and search facets to associations.
///
/// Target metadata goes through an LRU cache; each worker owns its own enricher.
pub struct Enricher {
    lookup: Arc<dyn LookupData>,
    targets: LruCache<String, TargetMeta>,
}

impl Enricher {
    pub fn new(lookup: Arc<dyn LookupData>, cache_size: usize) -> Self {
        Self {
            lookup,
            targets: LruCache::new(NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    fn target_meta(&mut self, target_id: &str) -> TargetMeta {
        if let Some(meta) = self.targets.get(target_id) {
            return meta.clone();
        }

        let gene = match self.lookup.get_gene(target_id) {
            Ok(gene) => Some(gene),
            Err(e) => {
                tracing::error!("association target: {}", e);
                None
            }
        };
        let expressed_tissues = match self.lookup.get_hpa(target_id) {
            Ok(hpa) => hpa.expressed_tissues(),
            Err(e) => {
                tracing::debug!("association target: {}", e);
                Vec::new()
            }
        };
        let meta = TargetMeta {
            gene,
            expressed_tissues,
        };
        self.targets.put(target_id.to_string(), meta.clone());
        meta
    }

    /// Number of cached targets.
    pub fn cached(&self) -> usize {
        self.targets.len()
    }

    pub fn enrich(&mut self, assoc: &mut Association) {
        let meta = self.target_meta(&assoc.target.id);
        let efo = match self.lookup.get_efo(&assoc.disease.id) {
            Ok(efo) => Some(efo),
            Err(e) => {
                tracing::error!("association disease: {}", e);
                None
            }
        };

        let mut free_text_search = IndexSet::new();
        free_text_search.insert(assoc.target.id.clone());
        if let Some(gene) = &meta.gene {
            assoc.target.gene_info = Some(GeneInfo::from(gene));
            free_text_search.insert(gene.approved_symbol.clone());
            free_text_search.insert(gene.approved_name.clone());
            free_text_search.extend(gene.symbol_synonyms.iter().cloned());
        }
        free_text_search.insert(assoc.disease.id.clone());
        if let Some(efo) = &efo {
            assoc.disease.efo_info = Some(EfoInfo::from(efo));
            free_text_search.insert(efo.label.clone());
        }

        let facets = &mut assoc.private.facets;
        facets.free_text_search = free_text_search
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        facets.datatype = non_zero_keys(&assoc.scores, |scores| &scores.datatypes);
        facets.datasource = non_zero_keys(&assoc.scores, |scores| &scores.datasources);
        facets.expression_tissues = meta.expressed_tissues;
    }
}

/// Sorted keys with a non-zero score in any of the score sets.
fn non_zero_keys<F>(scores: &IndexMap<String, ScoreSet>, map: F) -> Vec<String>
where
    F: Fn(&ScoreSet) -> &BTreeMap<String, f64>,
{
    scores
        .values()
        .flat_map(|score_set| map(score_set).iter())
        .filter(|(_, &score)| score > 0.0)
        .map(|(key, _)| key.clone())
        .sorted()
        .dedup()
        .collect()
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{conf::HARMONIC_SUM, lookup::test::example_tables};

    fn score(score: f64, datatype: EvidenceType, datasource: &str, is_direct: bool) -> EvidenceScore {
        EvidenceScore {
            score,
            datatype,
            datasource: datasource.to_string(),
            is_direct,
        }
    }

    #[test]
    fn single_source() {
        let conf = Conf::default();
        let assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000157764",
            "EFO_0000756",
            &[
                score(0.4, EvidenceType::KnownDrug, "chembl", false),
                score(0.81, EvidenceType::KnownDrug, "chembl", true),
            ],
        );

        assert_eq!(assoc.id, "ENSG00000157764-EFO_0000756");
        assert!(assoc.is_direct);
        assert_eq!(assoc.evidence_count.total, 2);
        assert_eq!(assoc.evidence_count.datasources["chembl"], 2);
        assert_eq!(assoc.evidence_count.datatypes["known_drug"], 2);

        let scores = &assoc.scores[HARMONIC_SUM];
        assert!(approx_eq!(f64, 0.91, scores.datasources["chembl"], epsilon = 1e-12));
        assert!(approx_eq!(f64, 0.91, scores.datatypes["known_drug"], epsilon = 1e-12));
        assert!(approx_eq!(f64, 0.91, scores.overall, epsilon = 1e-12));
        assert!(!assoc.is_empty());
    }

    #[test]
    fn layered_sources_and_types() {
        let conf = Conf::default();
        let assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000157764",
            "EFO_0000756",
            &[
                // capped at 1 on source level
                score(1.0, EvidenceType::GeneticAssociation, "gwas_catalog", false),
                score(1.0, EvidenceType::GeneticAssociation, "gwas_catalog", false),
                score(0.5, EvidenceType::GeneticAssociation, "eva", false),
                score(0.2, EvidenceType::Literature, "europepmc", false),
            ],
        );

        let scores = &assoc.scores[HARMONIC_SUM];
        assert_eq!(scores.datasources["gwas_catalog"], 1.0);
        assert_eq!(scores.datasources["eva"], 0.5);
        assert_eq!(scores.datasources["europepmc"], 0.2);
        assert!(approx_eq!(
            f64,
            1.0 + 0.5 / 4.0,
            scores.datatypes["genetic_association"],
            epsilon = 1e-12
        ));
        assert_eq!(scores.datatypes["literature"], 0.2);
        assert!(approx_eq!(
            f64,
            1.0 + 0.5 / 4.0 + 0.2 / 9.0,
            scores.overall,
            epsilon = 1e-12
        ));
        assert!(!assoc.is_direct);
        assert_eq!(assoc.evidence_count.total, 4);
    }

    #[test]
    fn unknown_source_is_not_counted() {
        let conf = Conf::default();
        let assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000157764",
            "EFO_0000756",
            &[
                score(0.5, EvidenceType::Literature, "europepmc", true),
                score(0.5, EvidenceType::Literature, "new_source", true),
            ],
        );

        assert_eq!(assoc.evidence_count.total, 1);
        assert!(!assoc.evidence_count.datasources.contains_key("new_source"));
        assert_eq!(assoc.scores[HARMONIC_SUM].datasources["new_source"], 0.5);
    }

    #[test]
    fn unknown_source_with_several_types() {
        let conf = Conf::default();
        let assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000157764",
            "EFO_0000756",
            &[
                score(0.4, EvidenceType::AnimalModel, "new_source", true),
                score(0.5, EvidenceType::Literature, "new_source", true),
            ],
        );

        let scores = &assoc.scores[HARMONIC_SUM];
        assert_eq!(scores.datatypes["literature"], 0.5);
        assert_eq!(scores.datatypes["animal_model"], 0.4);
        assert_eq!(scores.datasources["new_source"], 0.5);
        assert!(approx_eq!(f64, 0.5 + 0.4 / 4.0, scores.overall, epsilon = 1e-12));
    }

    #[test]
    fn no_evidence_is_empty() {
        let conf = Conf::default();
        let builder = AssociationBuilder::new(&conf);
        assert!(builder.build("ENSG00000157764", "EFO_0000756", &[]).is_empty());
        assert!(builder
            .build(
                "ENSG00000157764",
                "EFO_0000756",
                &[score(0.0, EvidenceType::KnownDrug, "chembl", true)]
            )
            .is_empty());
    }

    #[test]
    fn build_is_deterministic() {
        let conf = Conf::default();
        let builder = AssociationBuilder::new(&conf);
        let mut scores = (0..20)
            .map(|i| {
                score(
                    (i as f64) / 20.0,
                    EvidenceType::Literature,
                    if i % 2 == 0 { "europepmc" } else { "chembl" },
                    false,
                )
            })
            .collect::<Vec<_>>();
        let first = builder.build("ENSG00000157764", "EFO_0000756", &scores);
        scores.reverse();
        let second = builder.build("ENSG00000157764", "EFO_0000756", &scores);
        assert_eq!(first, second);
    }

    #[test]
    fn enrich_with_metadata_and_facets() {
        let conf = Conf::default();
        let mut assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000157764",
            "EFO_0000756",
            &[
                score(0.8, EvidenceType::KnownDrug, "chembl", true),
                score(0.0, EvidenceType::Literature, "europepmc", true),
            ],
        );
        let mut enricher = Enricher::new(Arc::new(example_tables()), 10);
        enricher.enrich(&mut assoc);

        assert_eq!(
            assoc.target.gene_info.as_ref().map(|g| g.symbol.as_str()),
            Some("BRAF")
        );
        assert_eq!(
            assoc.disease.efo_info.as_ref().map(|e| e.label.as_str()),
            Some("melanoma")
        );
        let facets = &assoc.private.facets;
        assert_eq!(facets.datatype, vec!["known_drug"]);
        assert_eq!(facets.datasource, vec!["chembl"]);
        assert_eq!(
            facets.free_text_search,
            vec![
                "ENSG00000157764",
                "BRAF",
                "B-Raf proto-oncogene, serine/threonine kinase",
                "BRAF1",
                "EFO_0000756",
                "melanoma"
            ]
        );
        assert_eq!(facets.expression_tissues, vec!["skin", "brain"]);
        assert_eq!(enricher.cached(), 1);
    }

    #[test]
    fn enrich_unknown_target() {
        let conf = Conf::default();
        let mut assoc = AssociationBuilder::new(&conf).build(
            "ENSG00000000001",
            "EFO_0000001",
            &[score(0.8, EvidenceType::KnownDrug, "chembl", true)],
        );
        let mut enricher = Enricher::new(Arc::new(example_tables()), 1);
        enricher.enrich(&mut assoc);

        assert_eq!(assoc.target.gene_info, None);
        assert_eq!(
            assoc.private.facets.free_text_search,
            vec!["ENSG00000000001", "EFO_0000001"]
        );
        assert!(assoc.private.facets.expression_tissues.is_empty());
    }

    #[test]
    fn enricher_cache_is_bounded() {
        let conf = Conf::default();
        let builder = AssociationBuilder::new(&conf);
        let mut enricher = Enricher::new(Arc::new(example_tables()), 2);
        for target in ["ENSG00000000001", "ENSG00000000002", "ENSG00000000003"] {
            let mut assoc = builder.build(
                target,
                "EFO_0000756",
                &[score(0.8, EvidenceType::KnownDrug, "chembl", true)],
            );
            enricher.enrich(&mut assoc);
        }
        assert_eq!(enricher.cached(), 2);
    }
}
