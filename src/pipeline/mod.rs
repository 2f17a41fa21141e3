//! The producer, scorer and storer stages of association computation.
//!
//! Targets are fed to a pool of producers that bucket the evidence of each target by
//! (target, disease) pair.  A pool of scorers turns the buckets into association
//! documents, and one storer writes them to the sink in batches.  Stages are connected
//! by bounded queues.  Each job runs on the blocking thread pool with a timeout; failed
//! jobs are logged and counted, and the run continues.

pub mod queue;
pub mod sink;
pub mod store;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use futures::future::try_join_all;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::{json, Value};
use thousands::Separable;

use crate::{
    assoc::{
        build::{AssociationBuilder, Enricher},
        ds::EvidenceScore,
        harmonic::sigmoid_scaling,
    },
    common,
    conf::Conf,
    err::AppError,
    evidence::ds::Evidence,
    lookup::LookupData,
};

use self::{
    queue::{QueueReceiver, QueueSender},
    sink::Sink,
    store::EvidenceStore,
};

/// All evidence scores of one (target, disease) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairJob {
    pub target_id: String,
    pub disease_id: String,
    pub scores: Vec<EvidenceScore>,
}

/// A finished association document.
#[derive(Debug, Clone)]
struct Document {
    id: String,
    body: Value,
}

/// Errors of single pipeline jobs.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("job timed out after {0:?}")]
    Timeout(Duration),
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct Stats {
    targets: AtomicUsize,
    evidence: AtomicUsize,
    pairs: AtomicUsize,
    associations: AtomicUsize,
    empty_associations: AtomicUsize,
    failed_jobs: AtomicUsize,
    sink_failures: AtomicUsize,
}

/// Snapshot of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub targets: usize,
    pub evidence: usize,
    pub pairs: usize,
    pub associations: usize,
    pub empty_associations: usize,
    pub failed_jobs: usize,
    pub sink_failures: usize,
}

fn inc(counter: &AtomicUsize, n: usize) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Stats {
    pub fn counts(&self) -> Counts {
        Counts {
            targets: self.targets.load(Ordering::Relaxed),
            evidence: self.evidence.load(Ordering::Relaxed),
            pairs: self.pairs.load(Ordering::Relaxed),
            associations: self.associations.load(Ordering::Relaxed),
            empty_associations: self.empty_associations.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

impl Counts {
    pub fn log(&self) {
        tracing::info!("  targets:            {}", self.targets.separate_with_commas());
        tracing::info!("  evidence:           {}", self.evidence.separate_with_commas());
        tracing::info!("  pairs:              {}", self.pairs.separate_with_commas());
        tracing::info!(
            "  associations:       {}",
            self.associations.separate_with_commas()
        );
        tracing::info!(
            "  empty associations: {}",
            self.empty_associations.separate_with_commas()
        );
        tracing::info!(
            "  failed jobs:        {}",
            self.failed_jobs.separate_with_commas()
        );
        tracing::info!(
            "  sink failures:      {}",
            self.sink_failures.separate_with_commas()
        );
    }
}

/// Where association documents go.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub index_name: String,
    pub doc_type: String,
}

/// Read-only inputs and counters shared by all workers.
#[derive(Clone)]
pub struct Context {
    pub conf: Arc<Conf>,
    pub store: Arc<dyn EvidenceStore>,
    pub lookup: Arc<dyn LookupData>,
    pub stats: Arc<Stats>,
}

impl Context {
    pub fn new(
        conf: Arc<Conf>,
        store: Arc<dyn EvidenceStore>,
        lookup: Arc<dyn LookupData>,
    ) -> Self {
        Self {
            conf,
            store,
            lookup,
            stats: Default::default(),
        }
    }

    fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.conf.pipeline.job_timeout_secs)
    }
}

/// Run `job` on the blocking thread pool, failing after `timeout`.
///
/// A timed out job is abandoned, not cancelled.
async fn run_job<T, F>(timeout: Duration, job: F) -> Result<T, JobError>
where
    F: FnOnce() -> Result<T, anyhow::Error> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(job)).await {
        Err(_) => Err(JobError::Timeout(timeout)),
        Ok(Err(e)) => Err(JobError::Panicked(e.to_string())),
        Ok(Ok(result)) => Ok(result?),
    }
}

/// Group the scored evidence of one target by disease.
///
/// Diseases are expanded to their ontology ancestors unless the data source is
/// configured not to propagate.  An evidence is direct for the disease it names.
pub fn bucket_target(
    target_id: &str,
    evidence: &[Evidence],
    conf: &Conf,
    lookup: &dyn LookupData,
) -> Vec<PairJob> {
    let damping = &conf.scoring.cluster_damping;
    let mut cluster_sizes: HashMap<&str, usize> = HashMap::new();
    if damping.enabled {
        for lit_id in evidence.iter().flat_map(|e| e.literature_ids()) {
            *cluster_sizes.entry(lit_id).or_default() += 1;
        }
    }

    let mut buckets: IndexMap<String, Vec<EvidenceScore>> = IndexMap::new();
    for ev in evidence {
        let mut score = ev.scores.association_score;
        if damping.enabled {
            if let Some(size) = ev
                .literature_ids()
                .filter_map(|lit_id| cluster_sizes.get(lit_id))
                .max()
            {
                score *= sigmoid_scaling(*size as f64, damping.mid_value, damping.precision);
            }
        }

        let datatype = conf
            .datatype_of(&ev.source_id)
            .unwrap_or(ev.evidence_type);
        let diseases = if conf.propagates(&ev.source_id) {
            lookup.ancestors(&ev.disease.id)
        } else {
            IndexSet::from([ev.disease.id.clone()])
        };
        for disease_id in diseases {
            let is_direct = disease_id == ev.disease.id;
            buckets.entry(disease_id).or_default().push(EvidenceScore {
                score,
                datatype,
                datasource: ev.source_id.clone(),
                is_direct,
            });
        }
    }

    buckets
        .into_iter()
        .map(|(disease_id, scores)| PairJob {
            target_id: target_id.to_string(),
            disease_id,
            scores,
        })
        .collect()
}

/// Stage 1: turn targets into (target, disease) buckets.
async fn produce(
    ctx: Context,
    targets: QueueReceiver<String>,
    pairs: QueueSender<PairJob>,
) -> Result<(), queue::Error> {
    let timeout = ctx.job_timeout();
    while let Some(target_id) = targets.get().await {
        let job_ctx = ctx.clone();
        let job_target_id = target_id.clone();
        let result = run_job(timeout, move || {
            let evidence = job_ctx.store.evidence_for_target(&job_target_id)?;
            let jobs = bucket_target(
                &job_target_id,
                &evidence,
                &job_ctx.conf,
                job_ctx.lookup.as_ref(),
            );
            Ok((evidence.len(), jobs))
        })
        .await;

        match result {
            Ok((num_evidence, jobs)) => {
                inc(&ctx.stats.targets, 1);
                inc(&ctx.stats.evidence, num_evidence);
                inc(&ctx.stats.pairs, jobs.len());
                for job in jobs {
                    pairs.put(job).await?;
                }
            }
            Err(e) => {
                tracing::error!("failed to process target {}: {}", &target_id, e);
                inc(&ctx.stats.failed_jobs, 1);
            }
        }
    }
    pairs.set_submission_finished();
    Ok(())
}

/// Stage 2: compute and enrich associations.
async fn score(
    ctx: Context,
    pairs: QueueReceiver<PairJob>,
    documents: QueueSender<Document>,
) -> Result<(), queue::Error> {
    let timeout = ctx.job_timeout();
    let enricher = Arc::new(Mutex::new(Enricher::new(
        ctx.lookup.clone(),
        ctx.conf.pipeline.gene_cache_size,
    )));
    while let Some(job) = pairs.get().await {
        let pair = format!("{}-{}", &job.target_id, &job.disease_id);
        let job_conf = ctx.conf.clone();
        let job_enricher = enricher.clone();
        let result = run_job(timeout, move || {
            let mut assoc = AssociationBuilder::new(&job_conf).build(
                &job.target_id,
                &job.disease_id,
                &job.scores,
            );
            if assoc.is_empty() {
                return Ok(None);
            }
            job_enricher
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .enrich(&mut assoc);
            Ok(Some(Document {
                body: serde_json::to_value(&assoc)?,
                id: assoc.id,
            }))
        })
        .await;

        match result {
            Ok(Some(document)) => documents.put(document).await?,
            Ok(None) => {
                tracing::debug!("skipping empty association {}", &pair);
                inc(&ctx.stats.empty_associations, 1);
            }
            Err(e) => {
                tracing::error!("failed to score pair {}: {}", &pair, e);
                inc(&ctx.stats.failed_jobs, 1);
            }
        }
    }
    documents.set_submission_finished();
    Ok(())
}

fn write_batch(sink: &mut dyn Sink, output: &Output, batch: &[Document], stats: &Stats) {
    let mut accepted = 0;
    for document in batch {
        match sink.put(
            &output.index_name,
            &output.doc_type,
            &document.id,
            &document.body,
            true,
        ) {
            Ok(()) => accepted += 1,
            Err(e) => {
                tracing::error!("could not store association {}: {}", &document.id, e);
                inc(&stats.sink_failures, 1);
            }
        }
    }
    match sink.flush() {
        Ok(()) => inc(&stats.associations, accepted),
        Err(e) => {
            tracing::error!("could not flush {} associations: {}", accepted, e);
            inc(&stats.sink_failures, accepted);
        }
    }
}

fn meta_document(ctx: &Context, output: &Output) -> Value {
    json!({
        "run_id": uuid::Uuid::new_v4(),
        "worker_version": common::worker_version(),
        "created": chrono::Utc::now().to_rfc3339(),
        "index": &output.index_name,
        "scoring_method": &ctx.conf.scoring.method,
        "counts": ctx.stats.counts(),
    })
}

/// Stage 3: write documents in batches, then the run metadata.
async fn store<S: Sink + 'static>(
    ctx: Context,
    output: Output,
    documents: QueueReceiver<Document>,
    mut sink: S,
) -> Result<S, anyhow::Error> {
    let batch_size = ctx.conf.pipeline.batch_size;
    loop {
        let batch = documents.get_batch(batch_size).await;
        if batch.is_empty() {
            break;
        }
        let job_output = output.clone();
        let stats = ctx.stats.clone();
        sink = tokio::task::spawn_blocking(move || {
            write_batch(&mut sink, &job_output, &batch, &stats);
            sink
        })
        .await?;
    }

    let meta = meta_document(&ctx, &output);
    let stats = ctx.stats.clone();
    let sink = tokio::task::spawn_blocking(move || {
        let meta_index = format!("{}-meta", &output.index_name);
        let result = meta["run_id"]
            .as_str()
            .map(|run_id| sink.put(&meta_index, "meta", run_id, &meta, true))
            .unwrap_or(Ok(()))
            .and_then(|_| sink.finalize());
        if let Err(e) = result {
            tracing::error!("could not finalize output: {}", e);
            inc(&stats.sink_failures, 1);
        }
        sink
    })
    .await?;
    Ok(sink)
}

/// Run all stages on the given targets, or on all targets of the store.
///
/// Returns the final counts and the sink, or an [`AppError`] if the run must fail.
pub async fn run_pipeline<S: Sink + 'static>(
    ctx: Context,
    output: Output,
    targets: Option<Vec<String>>,
    sink: S,
) -> Result<(Counts, S), anyhow::Error> {
    let before_pipeline = Instant::now();
    let target_ids = match targets {
        Some(targets) if !targets.is_empty() => targets,
        _ => ctx.store.target_ids(),
    };
    if target_ids.is_empty() {
        return Err(AppError::NothingToAggregate("no targets with evidence".into()).into());
    }
    let conf = ctx.conf.clone();
    let num_scorers = conf.num_scorers();
    tracing::info!(
        "Running pipeline on {} targets with {} producers and {} scorers",
        target_ids.len().separate_with_commas(),
        conf.pipeline.num_producers,
        num_scorers
    );

    let max_size = conf.pipeline.queue_max_size;
    let (target_tx, target_rx) = queue::bounded::<String>("targets", max_size);
    let (pair_tx, pair_rx) = queue::bounded::<PairJob>("pairs", max_size);
    let (document_tx, document_rx) = queue::bounded::<Document>("documents", max_size);

    let feeder = tokio::spawn(async move {
        for target_id in target_ids {
            target_tx.put(target_id).await?;
        }
        target_tx.set_submission_finished();
        Ok::<_, queue::Error>(())
    });
    let producers = (0..conf.pipeline.num_producers)
        .map(|_| tokio::spawn(produce(ctx.clone(), target_rx.clone(), pair_tx.clone())))
        .collect::<Vec<_>>();
    pair_tx.set_submission_finished();
    let scorers = (0..num_scorers)
        .map(|_| tokio::spawn(score(ctx.clone(), pair_rx.clone(), document_tx.clone())))
        .collect::<Vec<_>>();
    document_tx.set_submission_finished();
    let storer = tokio::spawn(store(ctx.clone(), output, document_rx, sink));

    let ticker_stats = ctx.stats.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let counts = ticker_stats.counts();
            tracing::info!(
                "  at {} targets, {} associations",
                counts.targets.separate_with_commas(),
                counts.associations.separate_with_commas()
            );
        }
    });

    feeder.await??;
    for result in try_join_all(producers).await? {
        result?;
    }
    for result in try_join_all(scorers).await? {
        result?;
    }
    let sink = storer.await??;
    ticker.abort();
    drop((target_rx, pair_rx));

    let counts = ctx.stats.counts();
    tracing::info!("... pipeline done in {:?}", before_pipeline.elapsed());
    counts.log();

    if counts.pairs == 0 {
        return Err(AppError::NothingToAggregate("no (target, disease) pairs".into()).into());
    }
    if counts.sink_failures > 0 {
        return Err(AppError::SinkFailures(counts.sink_failures).into());
    }
    if counts.failed_jobs > conf.pipeline.max_failed_jobs {
        return Err(AppError::TooManyFailedJobs {
            failed: counts.failed_jobs,
            max: conf.pipeline.max_failed_jobs,
        }
        .into());
    }
    Ok((counts, sink))
}

/// Run `future` to completion on a fresh multi-threaded runtime.
///
/// Blocking jobs still running afterwards, e.g., timed out ones, are left behind
/// rather than waited for on shutdown.
pub fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, anyhow::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{sink::MemorySink, store::JsonlEvidenceStore, *};
    use crate::{
        conf::{PipelineConfBuilder, HARMONIC_SUM},
        evidence::ds::EvidenceType,
        lookup::test::example_tables,
    };

    const BRAF: &str = "ENSG00000157764";
    const MELANOMA: &str = "EFO_0000756";

    fn line(source_id: &str, evidence_type: &str, target: &str, disease: &str, score: f64) -> String {
        json!({
            "id": format!("{}-{}-{}-{}", source_id, target, disease, score),
            "sourceID": source_id,
            "type": evidence_type,
            "target": {"id": target},
            "disease": {"id": disease},
            "literature": {"references": [{"lit_id": "PMID:1"}]},
            "scores": {"association_score": score}
        })
        .to_string()
    }

    fn evidence(lines: &[String]) -> Vec<Evidence> {
        lines
            .iter()
            .map(|line| serde_json::from_str(line).expect("valid evidence JSON in test"))
            .collect()
    }

    fn example_lines() -> Vec<String> {
        vec![
            line("chembl", "known_drug", BRAF, MELANOMA, 0.4),
            line("chembl", "known_drug", BRAF, MELANOMA, 0.81),
            line("expression_atlas", "rna_expression", BRAF, MELANOMA, 0.5),
            line("new_source", "literature", BRAF, MELANOMA, 0.3),
        ]
    }

    fn context(conf: Conf, store: impl EvidenceStore + 'static) -> Context {
        Context::new(Arc::new(conf), Arc::new(store), Arc::new(example_tables()))
    }

    fn output() -> Output {
        Output {
            index_name: "assoc".into(),
            doc_type: "association".into(),
        }
    }

    #[test]
    fn bucket_target_propagates() {
        let conf = Conf::default();
        let jobs = bucket_target(BRAF, &evidence(&example_lines()), &conf, &example_tables());

        let diseases = jobs.iter().map(|j| j.disease_id.as_str()).collect::<Vec<_>>();
        assert_eq!(diseases, vec![MELANOMA, "EFO_0000616", "EFO_0000311"]);

        // expression_atlas is not propagated
        assert_eq!(jobs[0].scores.len(), 4);
        assert_eq!(jobs[1].scores.len(), 3);
        assert!(jobs[0].scores.iter().all(|s| s.is_direct));
        assert!(jobs[1].scores.iter().all(|s| !s.is_direct));
        assert!(jobs[1]
            .scores
            .iter()
            .all(|s| s.datasource != "expression_atlas"));

        // unknown sources keep the evidence type as data type
        let unknown = jobs[0]
            .scores
            .iter()
            .find(|s| s.datasource == "new_source")
            .expect("in bucket");
        assert_eq!(unknown.datatype, EvidenceType::Literature);
    }

    #[test]
    fn bucket_target_cluster_damping() {
        let mut conf = Conf::default();
        conf.scoring.cluster_damping.enabled = true;
        conf.scoring.cluster_damping.mid_value = 2.0;
        conf.scoring.cluster_damping.precision = 1.0;
        let lines = vec![
            line("europepmc", "literature", BRAF, "EFO_9999999", 0.5),
            line("europepmc", "literature", BRAF, "EFO_9999999", 0.5),
            line("europepmc", "literature", BRAF, "EFO_9999999", 0.5),
        ];

        let jobs = bucket_target(BRAF, &evidence(&lines), &conf, &example_tables());

        assert_eq!(jobs.len(), 1);
        let expected = 0.5 / (1.0 + 1.0f64.exp());
        for score in &jobs[0].scores {
            assert!(approx_eq!(f64, expected, score.score, epsilon = 1e-12));
        }
    }

    #[tokio::test]
    async fn run_pipeline_end_to_end() -> Result<(), anyhow::Error> {
        let ctx = context(
            Conf::default(),
            JsonlEvidenceStore::from_lines(example_lines()),
        );

        let (counts, sink) = run_pipeline(ctx, output(), None, MemorySink::default()).await?;

        assert_eq!(
            counts,
            Counts {
                targets: 1,
                evidence: 4,
                pairs: 3,
                associations: 3,
                empty_associations: 0,
                failed_jobs: 0,
                sink_failures: 0,
            }
        );
        assert!(sink.finalized);
        assert_eq!(sink.docs.len(), 4);

        let melanoma = &sink.docs[&("assoc".to_string(), format!("{}-{}", BRAF, MELANOMA))];
        assert_eq!(melanoma["is_direct"], json!(true));
        assert_eq!(melanoma["evidence_count"]["total"], json!(3));
        assert_eq!(melanoma["target"]["gene_info"]["symbol"], json!("BRAF"));
        let chembl = melanoma[HARMONIC_SUM]["datasources"]["chembl"]
            .as_f64()
            .unwrap_or_default();
        assert!(approx_eq!(f64, 0.91, chembl, epsilon = 1e-12));

        let cancer = &sink.docs[&("assoc".to_string(), format!("{}-EFO_0000311", BRAF))];
        assert_eq!(cancer["is_direct"], json!(false));
        assert!(cancer[HARMONIC_SUM]["datasources"]
            .get("expression_atlas")
            .is_none());

        let meta = sink
            .docs
            .iter()
            .find(|((index, _), _)| index == "assoc-meta")
            .map(|(_, doc)| doc)
            .expect("meta document written");
        assert_eq!(meta["worker_version"], json!("x.y.z"));
        assert_eq!(meta["counts"]["associations"], json!(3));
        Ok(())
    }

    #[tokio::test]
    async fn run_pipeline_selected_targets_and_small_queues() -> Result<(), anyhow::Error> {
        let mut lines = example_lines();
        lines.push(line("chembl", "known_drug", "ENSG00000000001", MELANOMA, 0.5));
        let conf = Conf {
            pipeline: PipelineConfBuilder::default()
                .num_producers(2)
                .num_scorers(3)
                .queue_max_size(1)
                .batch_size(1)
                .build()?,
            ..Default::default()
        };
        let ctx = context(conf, JsonlEvidenceStore::from_lines(lines));

        let (counts, sink) = run_pipeline(
            ctx,
            output(),
            Some(vec!["ENSG00000000001".into()]),
            MemorySink::default(),
        )
        .await?;

        assert_eq!(counts.targets, 1);
        assert_eq!(counts.associations, 3);
        // one flush per document, plus finalize
        assert_eq!(sink.flushes, 4);
        Ok(())
    }

    #[tokio::test]
    async fn empty_associations_are_skipped() -> Result<(), anyhow::Error> {
        let ctx = context(
            Conf::default(),
            JsonlEvidenceStore::from_lines([line("chembl", "known_drug", BRAF, "EFO_9999999", 0.0)]),
        );

        let (counts, sink) = run_pipeline(ctx, output(), None, MemorySink::default()).await?;

        assert_eq!(counts.pairs, 1);
        assert_eq!(counts.empty_associations, 1);
        assert_eq!(counts.associations, 0);
        assert_eq!(sink.docs.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn no_targets_is_an_error() {
        let ctx = context(Conf::default(), JsonlEvidenceStore::default());
        let err = run_pipeline(ctx, output(), None, MemorySink::default())
            .await
            .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::NothingToAggregate(_))
        ));
    }

    #[tokio::test]
    async fn sink_failures_fail_the_run() {
        let ctx = context(
            Conf::default(),
            JsonlEvidenceStore::from_lines(example_lines()),
        );
        let mut sink = MemorySink::default();
        sink.reject_ids.insert(format!("{}-{}", BRAF, MELANOMA));

        let err = run_pipeline(ctx, output(), None, sink)
            .await
            .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::SinkFailures(n)) if *n > 0
        ));
    }

    /// Store that fails in different ways for some targets.
    struct FlakyStore {
        inner: JsonlEvidenceStore,
    }

    impl EvidenceStore for FlakyStore {
        fn target_ids(&self) -> Vec<String> {
            let mut ids = self.inner.target_ids();
            ids.extend(["panics".to_string(), "fails".to_string(), "slow".to_string()]);
            ids
        }

        fn evidence_for_target(&self, target_id: &str) -> Result<Vec<Evidence>, anyhow::Error> {
            match target_id {
                "panics" => panic!("broken target"),
                "fails" => anyhow::bail!("could not fetch evidence"),
                "slow" => {
                    std::thread::sleep(Duration::from_secs(2));
                    Ok(Vec::new())
                }
                _ => self.inner.evidence_for_target(target_id),
            }
        }
    }

    #[tokio::test]
    async fn failed_jobs_are_isolated() -> Result<(), anyhow::Error> {
        let store = FlakyStore {
            inner: JsonlEvidenceStore::from_lines(example_lines()),
        };

        let conf = Conf {
            pipeline: PipelineConfBuilder::default()
                .job_timeout_secs(1)
                .max_failed_jobs(3)
                .build()?,
            ..Default::default()
        };
        let (counts, sink) =
            run_pipeline(context(conf, store), output(), None, MemorySink::default())
                .await?;
        assert_eq!(counts.failed_jobs, 3);
        assert_eq!(counts.associations, 3);
        assert_eq!(sink.docs.len(), 4);

        let store = FlakyStore {
            inner: JsonlEvidenceStore::from_lines(example_lines()),
        };
        let conf = Conf {
            pipeline: PipelineConfBuilder::default()
                .job_timeout_secs(1)
                .max_failed_jobs(2)
                .build()?,
            ..Default::default()
        };
        let err = run_pipeline(context(conf, store), output(), None, MemorySink::default())
            .await
            .expect_err("must fail");
        assert_eq!(
            err.downcast_ref::<AppError>(),
            Some(&AppError::TooManyFailedJobs { failed: 3, max: 2 })
        );
        Ok(())
    }

    /// Store whose lookup of the target "hangs" outlives any job timeout.
    struct HangingStore {
        inner: JsonlEvidenceStore,
    }

    impl EvidenceStore for HangingStore {
        fn target_ids(&self) -> Vec<String> {
            let mut ids = self.inner.target_ids();
            ids.push("hangs".to_string());
            ids
        }

        fn evidence_for_target(&self, target_id: &str) -> Result<Vec<Evidence>, anyhow::Error> {
            if target_id == "hangs" {
                std::thread::sleep(Duration::from_secs(6));
                return Ok(Vec::new());
            }
            self.inner.evidence_for_target(target_id)
        }
    }

    #[test]
    fn block_on_returns_without_waiting_for_hung_jobs() -> Result<(), anyhow::Error> {
        let store = HangingStore {
            inner: JsonlEvidenceStore::from_lines(example_lines()),
        };
        let conf = Conf {
            pipeline: PipelineConfBuilder::default()
                .job_timeout_secs(1)
                .max_failed_jobs(1)
                .build()?,
            ..Default::default()
        };

        let before = Instant::now();
        let (counts, _sink) = block_on(run_pipeline(
            context(conf, store),
            output(),
            None,
            MemorySink::default(),
        ))??;

        assert!(before.elapsed() < Duration::from_secs(4));
        assert_eq!(counts.failed_jobs, 1);
        assert_eq!(counts.associations, 3);
        Ok(())
    }
}
