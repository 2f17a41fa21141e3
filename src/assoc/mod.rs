//! Implementation of the `assoc compute` subcommand.

pub mod build;
pub mod ds;
pub mod harmonic;

use std::{sync::Arc, time::Instant};

use crate::{
    common,
    conf::Conf,
    lookup::LookupTables,
    pipeline::{
        self,
        sink::{JsonlSink, SinkMode},
        store::JsonlEvidenceStore,
        Context, Counts, Output,
    },
};

/// Command line arguments for `assoc compute` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Compute target-disease associations", long_about = None)]
pub struct Args {
    /// Path(s) to JSONL files with scored evidence, or @ with path to file listing paths.
    #[clap(long, required = true)]
    pub path_evidence: Vec<String>,
    /// Path to the output directory, one JSONL file is written per index.
    #[clap(long)]
    pub path_output_dir: String,
    /// Path to the TOML configuration, defaults are used if missing.
    #[clap(long)]
    pub path_conf: Option<String>,
    /// Path to the directory with lookup tables.
    #[clap(long)]
    pub path_lookup_dir: Option<String>,
    /// Name of the output index.
    #[clap(long, default_value = "association-data")]
    pub index_name: String,
    /// Document type of the association documents.
    #[clap(long, default_value = "association")]
    pub doc_type: String,
    /// Append to existing indices rather than recreating them.
    #[clap(long, default_value_t = false)]
    pub append: bool,
    /// Only compute associations of these targets.
    #[clap(long)]
    pub target: Vec<String>,

    /// Override `pipeline.num_producers` of the configuration.
    #[clap(long)]
    pub num_producers: Option<usize>,
    /// Override `pipeline.num_scorers` of the configuration.
    #[clap(long)]
    pub num_scorers: Option<usize>,
    /// Override `pipeline.queue_max_size` of the configuration.
    #[clap(long)]
    pub queue_max_size: Option<usize>,
    /// Override `pipeline.batch_size` of the configuration.
    #[clap(long)]
    pub batch_size: Option<usize>,
    /// Override `pipeline.job_timeout_secs` of the configuration.
    #[clap(long)]
    pub job_timeout_secs: Option<u64>,
}

/// Configuration with the command line overrides applied.
fn load_conf(args: &Args) -> Result<Conf, anyhow::Error> {
    let mut conf = Conf::load(args.path_conf.as_deref())?;
    let pipeline = &mut conf.pipeline;
    if let Some(num_producers) = args.num_producers {
        pipeline.num_producers = num_producers;
    }
    if let Some(num_scorers) = args.num_scorers {
        pipeline.num_scorers = num_scorers;
    }
    if let Some(queue_max_size) = args.queue_max_size {
        pipeline.queue_max_size = queue_max_size;
    }
    if let Some(batch_size) = args.batch_size {
        pipeline.batch_size = batch_size;
    }
    if let Some(job_timeout_secs) = args.job_timeout_secs {
        pipeline.job_timeout_secs = job_timeout_secs;
    }
    conf.validate()?;
    Ok(conf)
}

/// Load inputs and run the association pipeline to the JSONL sink.
fn compute(args: &Args) -> Result<Counts, anyhow::Error> {
    let conf = load_conf(args)?;
    let lookup = LookupTables::load_or_empty(args.path_lookup_dir.as_deref())?;
    let path_evidence = common::expand_at_paths(&args.path_evidence)?;
    let store = JsonlEvidenceStore::load(&path_evidence)?;
    common::trace_rss_now();

    let mode = if args.append {
        SinkMode::Append
    } else {
        SinkMode::Recreate
    };
    let sink = JsonlSink::new(shellexpand::tilde(&args.path_output_dir).to_string(), mode)?;
    let ctx = Context::new(Arc::new(conf), Arc::new(store), Arc::new(lookup));
    let output = Output {
        index_name: args.index_name.clone(),
        doc_type: args.doc_type.clone(),
    };
    let targets = (!args.target.is_empty()).then(|| args.target.clone());

    let (counts, _sink) = pipeline::block_on(pipeline::run_pipeline(ctx, output, targets, sink))??;
    Ok(counts)
}

/// Main entry point for `assoc compute` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    compute(args)?;
    common::trace_rss_now();

    tracing::info!(
        "All of `assoc compute` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
