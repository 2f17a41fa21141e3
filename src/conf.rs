//! Code for the scoring and pipeline configuration file.
//!
//! The configuration is loaded once, validated and then shared read-only with the scorers
//! and the pipeline stages.

use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{evidence::ds::EvidenceType, normalise::DataNormaliser};

/// Maximal number of workers in the aggregation stage.
pub const MAX_SCORERS: usize = 16;

/// Name of the default scoring method key in association documents.
pub const HARMONIC_SUM: &str = "harmonic-sum";

/// Per-datasource configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasourceConf {
    /// The data type this data source belongs to.
    pub datatype: EvidenceType,
    /// Evidence scoring below this value is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Multiplicative weight applied to evidence scores, result capped at 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Renormalisation applied after weighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normaliser: Option<DataNormaliser>,
    /// Whether the disease of the evidence is expanded to its ontology ancestors.
    #[serde(default = "default_true")]
    pub propagate: bool,
}

fn default_true() -> bool {
    true
}

impl DatasourceConf {
    fn new(datatype: EvidenceType) -> Self {
        Self {
            datatype,
            min_score: None,
            weight: None,
            normaliser: None,
            propagate: true,
        }
    }

    fn with_weight(self, weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..self
        }
    }

    fn with_min_score(self, min_score: f64) -> Self {
        Self {
            min_score: Some(min_score),
            ..self
        }
    }

    fn without_propagation(self) -> Self {
        Self {
            propagate: false,
            ..self
        }
    }
}

/// Damping of evidence sharing literature references with many other evidence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ClusterDamping {
    pub enabled: bool,
    /// Cluster size at which the damping factor is 0.5.
    pub mid_value: f64,
    /// Steepness of the logistic curve; smaller is steeper.
    pub precision: f64,
}

impl Default for ClusterDamping {
    fn default() -> Self {
        Self {
            enabled: false,
            mid_value: 50.0,
            precision: 3.0,
        }
    }
}

/// Configuration of the association scoring.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScoringConf {
    /// Key of the score object in the association documents.
    pub method: String,
    /// Number of top values kept by each harmonic sum scorer.
    pub buffer: usize,
    pub datasource_scale_factor: f64,
    /// Cap applied to the per-datasource harmonic sums.
    pub datasource_cap: f64,
    pub datatype_scale_factor: f64,
    pub overall_scale_factor: f64,
    pub cluster_damping: ClusterDamping,
}

impl Default for ScoringConf {
    fn default() -> Self {
        Self {
            method: HARMONIC_SUM.to_string(),
            buffer: 100,
            datasource_scale_factor: 2.0,
            datasource_cap: 1.0,
            datatype_scale_factor: 2.0,
            overall_scale_factor: 2.0,
            cluster_damping: Default::default(),
        }
    }
}

/// Configuration of the producer/scorer/storer pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, derive_builder::Builder)]
#[serde(default)]
#[builder(default)]
pub struct PipelineConf {
    /// Number of workers turning targets into (target, disease) buckets.
    pub num_producers: usize,
    /// Number of workers aggregating buckets into associations.
    pub num_scorers: usize,
    /// Capacity of each inter-stage queue.
    pub queue_max_size: usize,
    /// Timeout of each job in seconds.
    pub job_timeout_secs: u64,
    /// Number of documents buffered by the sink between flushes.
    pub batch_size: usize,
    /// The run fails if more jobs than this fail.
    pub max_failed_jobs: usize,
    /// Capacity of the worker-local gene metadata cache.
    pub gene_cache_size: usize,
}

impl Default for PipelineConf {
    fn default() -> Self {
        Self {
            num_producers: 4,
            num_scorers: 8,
            queue_max_size: 10_000,
            job_timeout_secs: 300,
            batch_size: 1_000,
            max_failed_jobs: 0,
            gene_cache_size: 1_000,
        }
    }
}

/// Top-level configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Conf {
    pub scoring: ScoringConf,
    pub pipeline: PipelineConf,
    /// Data sources by `sourceID`, configured entries replace the built-in ones
    /// of the same name.
    #[serde(deserialize_with = "merge_datasources")]
    pub datasources: IndexMap<String, DatasourceConf>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            scoring: Default::default(),
            pipeline: Default::default(),
            datasources: default_datasources(),
        }
    }
}

/// The standard data sources with their data types.
fn default_datasources() -> IndexMap<String, DatasourceConf> {
    use EvidenceType::*;

    [
        ("gwas_catalog", DatasourceConf::new(GeneticAssociation)),
        ("phewas_catalog", DatasourceConf::new(GeneticAssociation)),
        ("twentythreeandme", DatasourceConf::new(GeneticAssociation)),
        ("ot_genetics_portal", DatasourceConf::new(GeneticAssociation)),
        ("uniprot", DatasourceConf::new(GeneticAssociation)),
        ("uniprot_literature", DatasourceConf::new(GeneticAssociation)),
        ("gene2phenotype", DatasourceConf::new(GeneticAssociation)),
        ("genomics_england", DatasourceConf::new(GeneticAssociation)),
        ("eva", DatasourceConf::new(GeneticAssociation)),
        ("cancer_gene_census", DatasourceConf::new(SomaticMutation)),
        ("uniprot_somatic", DatasourceConf::new(SomaticMutation)),
        ("eva_somatic", DatasourceConf::new(SomaticMutation)),
        ("intogen", DatasourceConf::new(SomaticMutation)),
        ("chembl", DatasourceConf::new(KnownDrug)),
        ("reactome", DatasourceConf::new(AffectedPathway)),
        ("slapenrich", DatasourceConf::new(AffectedPathway).with_weight(0.5)),
        ("progeny", DatasourceConf::new(AffectedPathway).with_weight(0.5)),
        ("sysbio", DatasourceConf::new(AffectedPathway).with_weight(0.5)),
        ("crispr", DatasourceConf::new(AffectedPathway).with_weight(0.5)),
        (
            "expression_atlas",
            DatasourceConf::new(RnaExpression)
                .with_weight(0.2)
                .without_propagation(),
        ),
        ("europepmc", DatasourceConf::new(Literature).with_weight(0.2)),
        (
            "phenodigm",
            DatasourceConf::new(AnimalModel)
                .with_min_score(0.4)
                .with_weight(0.2),
        ),
    ]
    .into_iter()
    .map(|(name, conf)| (name.to_string(), conf))
    .collect()
}

/// Deserialize data sources on top of the built-in table.
fn merge_datasources<'de, D>(deserializer: D) -> Result<IndexMap<String, DatasourceConf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let configured = IndexMap::<String, DatasourceConf>::deserialize(deserializer)?;
    let mut datasources = default_datasources();
    datasources.extend(configured);
    Ok(datasources)
}

impl Conf {
    /// Load configuration from the TOML file at `path`, or use the defaults.
    pub fn load(path: Option<&str>) -> Result<Self, anyhow::Error> {
        let conf = if let Some(path) = path {
            let path = shellexpand::tilde(path).to_string();
            tracing::info!("Loading configuration from {}", &path);
            let toml_str = std::fs::read_to_string(Path::new(&path))
                .map_err(|e| anyhow::anyhow!("could not read configuration {}: {}", &path, e))?;
            toml::from_str(&toml_str)
                .map_err(|e| anyhow::anyhow!("could not parse configuration {}: {}", &path, e))?
        } else {
            tracing::info!("Using default configuration");
            Conf::default()
        };
        conf.validate()?;
        Ok(conf)
    }

    /// Check value ranges that would otherwise only fail deep inside a run.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.scoring.buffer == 0 {
            anyhow::bail!("scoring.buffer must be positive");
        }
        if self.scoring.method.is_empty() {
            anyhow::bail!("scoring.method must not be empty");
        }
        if self.pipeline.num_producers == 0 || self.pipeline.num_scorers == 0 {
            anyhow::bail!("pipeline needs at least one producer and one scorer");
        }
        if self.pipeline.queue_max_size == 0 || self.pipeline.batch_size == 0 {
            anyhow::bail!("pipeline.queue_max_size and pipeline.batch_size must be positive");
        }
        if self.pipeline.job_timeout_secs == 0 {
            anyhow::bail!("pipeline.job_timeout_secs must be positive");
        }
        for (name, datasource) in &self.datasources {
            if let Some(weight) = datasource.weight {
                if !(weight >= 0.0) {
                    anyhow::bail!("datasource {} has invalid weight {}", name, weight);
                }
            }
        }
        Ok(())
    }

    /// Configuration of the data source, if it is known.
    pub fn datasource(&self, source_id: &str) -> Option<&DatasourceConf> {
        self.datasources.get(source_id)
    }

    /// The data type of a known data source.
    pub fn datatype_of(&self, source_id: &str) -> Option<EvidenceType> {
        self.datasource(source_id).map(|ds| ds.datatype)
    }

    /// The configured set of data types.
    pub fn datatypes(&self) -> IndexSet<EvidenceType> {
        self.datasources.values().map(|ds| ds.datatype).collect()
    }

    /// Whether evidence of the data source is propagated through the disease ontology.
    ///
    /// Unknown data sources are propagated.
    pub fn propagates(&self, source_id: &str) -> bool {
        self.datasource(source_id)
            .map(|ds| ds.propagate)
            .unwrap_or(true)
    }

    /// Number of aggregation workers, clamped to [`MAX_SCORERS`].
    pub fn num_scorers(&self) -> usize {
        if self.pipeline.num_scorers > MAX_SCORERS {
            tracing::warn!(
                "limiting number of scorers from {} to {}",
                self.pipeline.num_scorers,
                MAX_SCORERS
            );
        }
        self.pipeline.num_scorers.min(MAX_SCORERS)
    }
}

/// Command line arguments for `conf default` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Print the default configuration", long_about = None)]
pub struct Args {}

/// Main entry point for `conf default` sub command.
pub fn run(_args_common: &crate::common::Args, _args: &Args) -> Result<(), anyhow::Error> {
    print!("{}", toml::to_string_pretty(&Conf::default())?);
    Ok(())
}
