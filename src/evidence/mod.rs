//! Implementation of the `evidence score` subcommand.
//!
//! Raw evidence is validated and normalised, scored and optionally extended with
//! metadata, chunk by chunk in parallel.  Output order follows input order.

pub mod ds;
pub mod extend;
pub mod fix;
pub mod score;

use std::{
    io::{BufRead, Write},
    time::Instant,
};

use rayon::prelude::*;
use serde::Serialize;
use thousands::Separable;

use crate::{
    common::{self, open_read_maybe_gz, open_write_maybe_gz},
    conf::Conf,
    err::AppError,
    lookup::{LookupData, LookupTables},
};

use self::{
    ds::Evidence,
    score::{EvidenceScorer, Outcome},
};

/// Command line arguments for `evidence score` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Validate, score and extend evidence", long_about = None)]
pub struct Args {
    /// Path(s) to JSONL evidence files, or @ with path to file listing paths.
    #[clap(long, required = true)]
    pub path_input: Vec<String>,
    /// Path to the output JSONL file with scored evidence.
    #[clap(long)]
    pub path_output: String,
    /// Path to the TOML configuration, defaults are used if missing.
    #[clap(long)]
    pub path_conf: Option<String>,
    /// Path to the directory with lookup tables, no metadata is injected if missing.
    #[clap(long)]
    pub path_lookup_dir: Option<String>,
    /// Path to JSONL file for writing rejected records to.
    #[clap(long)]
    pub path_rejected: Option<String>,
    /// Number of threads to use for scoring.
    #[clap(long)]
    pub num_threads: Option<usize>,
    /// Number of records read and processed at once.
    #[clap(long, default_value_t = 10_000)]
    pub chunk_size: usize,
}

/// Why a record was not written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionKind {
    /// Could not be parsed or has invalid identifiers.
    Invalid,
    /// Missing or malformed fields for its type.
    Malformed,
    /// Scored below the minimum of its data source.
    BelowMinimum,
    /// Data error that fails the run.
    Fatal,
}

/// Entry of the rejected records file.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub id: Option<String>,
    #[serde(rename = "sourceID")]
    pub source_id: Option<String>,
    pub reason: String,
    /// The input line.
    pub line: String,
}

/// Result of processing one input line.
#[derive(Debug)]
enum Processed {
    Kept {
        evidence: Evidence,
        lookup_misses: usize,
    },
    Rejected(Rejection),
}

/// Counters of one `evidence score` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub read: usize,
    pub written: usize,
    pub invalid: usize,
    pub malformed: usize,
    pub below_minimum: usize,
    pub fatal: usize,
    pub unknown_source: usize,
    pub lookup_misses: usize,
}

impl Stats {
    fn record(&mut self, processed: &Processed, conf: &Conf) {
        self.read += 1;
        match processed {
            Processed::Kept {
                evidence,
                lookup_misses,
            } => {
                self.written += 1;
                self.lookup_misses += lookup_misses;
                if conf.datasource(&evidence.source_id).is_none() {
                    self.unknown_source += 1;
                }
            }
            Processed::Rejected(rejection) => match rejection.kind {
                RejectionKind::Invalid => self.invalid += 1,
                RejectionKind::Malformed => self.malformed += 1,
                RejectionKind::BelowMinimum => self.below_minimum += 1,
                RejectionKind::Fatal => self.fatal += 1,
            },
        }
    }

    fn log(&self) {
        tracing::info!("  records read:          {}", self.read.separate_with_commas());
        tracing::info!("  records written:       {}", self.written.separate_with_commas());
        tracing::info!("  invalid:               {}", self.invalid.separate_with_commas());
        tracing::info!("  malformed:             {}", self.malformed.separate_with_commas());
        tracing::info!(
            "  below minimum score:   {}",
            self.below_minimum.separate_with_commas()
        );
        tracing::info!("  fatal:                 {}", self.fatal.separate_with_commas());
        tracing::info!(
            "  unknown data source:   {}",
            self.unknown_source.separate_with_commas()
        );
        tracing::info!(
            "  failed lookups:        {}",
            self.lookup_misses.separate_with_commas()
        );
    }
}

/// Fix, score and extend one input line.
fn process_line(
    line: &str,
    scorer: &EvidenceScorer,
    lookup: Option<&dyn LookupData>,
) -> Processed {
    let parsed = match fix::parse(line) {
        Ok(evidence) => evidence,
        Err(e) => {
            tracing::error!("rejecting unparseable evidence: {}", e);
            return Processed::Rejected(Rejection {
                kind: RejectionKind::Invalid,
                id: None,
                source_id: None,
                reason: e.to_string(),
                line: line.to_string(),
            });
        }
    };

    let raw_id = parsed.id.trim().to_string();
    let raw_source_id = parsed.source_id.clone();
    let evidence_type = parsed.evidence_type;
    let mut evidence = match fix::fix(parsed) {
        Ok(evidence) => evidence,
        Err(e) => {
            tracing::error!(
                "rejecting invalid {} evidence {:?} from {:?}: {}",
                evidence_type,
                &raw_id,
                &raw_source_id,
                e
            );
            return Processed::Rejected(Rejection {
                kind: RejectionKind::Invalid,
                id: Some(raw_id).filter(|id| !id.is_empty()),
                source_id: Some(raw_source_id),
                reason: e.to_string(),
                line: line.to_string(),
            });
        }
    };

    let rejection = |kind: RejectionKind, reason: String, evidence: &Evidence| Rejection {
        kind,
        id: Some(evidence.id.clone()),
        source_id: Some(evidence.source_id.clone()),
        reason,
        line: line.to_string(),
    };

    match scorer.score_in_place(&mut evidence) {
        Ok(Outcome::Scored(_)) => (),
        Ok(Outcome::BelowMinimum { score, min_score }) => {
            tracing::debug!(
                "evidence {} from {} scored {} below minimum {}",
                &evidence.id,
                &evidence.source_id,
                score,
                min_score
            );
            return Processed::Rejected(rejection(
                RejectionKind::BelowMinimum,
                format!("score {} below minimum {}", score, min_score),
                &evidence,
            ));
        }
        Err(e) => {
            tracing::error!(
                "could not score {} evidence {} from {}: {}",
                evidence.evidence_type,
                &evidence.id,
                &evidence.source_id,
                e
            );
            let kind = if e.is_fatal() {
                RejectionKind::Fatal
            } else {
                RejectionKind::Malformed
            };
            return Processed::Rejected(rejection(kind, e.to_string(), &evidence));
        }
    }

    let lookup_misses = lookup
        .map(|lookup| extend::extend(&mut evidence, lookup))
        .unwrap_or_default();
    Processed::Kept {
        evidence,
        lookup_misses,
    }
}

/// Process all evidence in `paths` and write the results.
pub fn score_files(
    paths: &[String],
    path_output: &str,
    path_rejected: Option<&str>,
    conf: &Conf,
    lookup: Option<&dyn LookupData>,
    chunk_size: usize,
) -> Result<Stats, anyhow::Error> {
    let scorer = EvidenceScorer::new(conf);
    let mut writer = open_write_maybe_gz(path_output)?;
    let mut rejected_writer = path_rejected.map(open_write_maybe_gz).transpose()?;
    let mut stats = Stats::default();
    let mut prev = Instant::now();

    for path in paths {
        tracing::info!("Processing {}...", path);
        let mut lines = open_read_maybe_gz(path)?.lines();
        loop {
            let mut taken = 0;
            let mut chunk = Vec::with_capacity(chunk_size);
            for line in lines.by_ref().take(chunk_size.max(1)) {
                taken += 1;
                let line = line?;
                if !line.trim().is_empty() {
                    chunk.push(line);
                }
            }
            if taken == 0 {
                break;
            }

            let processed = chunk
                .par_iter()
                .map(|line| process_line(line, &scorer, lookup))
                .collect::<Vec<_>>();

            for processed in processed {
                stats.record(&processed, conf);
                match processed {
                    Processed::Kept { evidence, .. } => {
                        serde_json::to_writer(&mut writer, &evidence)?;
                        writeln!(writer)?;
                    }
                    Processed::Rejected(rejection) => {
                        if let Some(rejected_writer) = rejected_writer.as_mut() {
                            serde_json::to_writer(&mut *rejected_writer, &rejection)?;
                            writeln!(rejected_writer)?;
                        }
                    }
                }
            }

            if prev.elapsed().as_secs() >= 60 {
                tracing::info!("  processed {} records", stats.read.separate_with_commas());
                prev = Instant::now();
            }
        }
    }

    writer
        .finish()
        .map_err(|e| anyhow::anyhow!("could not finish output {}: {}", path_output, e))?;
    if let Some(rejected_writer) = rejected_writer {
        rejected_writer.finish().map_err(|e| {
            anyhow::anyhow!("could not finish rejected records file: {}", e)
        })?;
    }

    Ok(stats)
}

/// Main entry point for `evidence score` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    if let Some(num_threads) = args.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("building global Rayon thread pool failed: {}", e))?;
    }

    let conf = Conf::load(args.path_conf.as_deref())?;
    let lookup = args
        .path_lookup_dir
        .as_deref()
        .map(|path| LookupTables::load(shellexpand::tilde(path).to_string()))
        .transpose()?;
    let path_input = common::expand_at_paths(&args.path_input)?;
    common::trace_rss_now();

    tracing::info!("Scoring evidence...");
    let before_scoring = Instant::now();
    let stats = score_files(
        &path_input,
        &args.path_output,
        args.path_rejected.as_deref(),
        &conf,
        lookup.as_ref().map(|lookup| lookup as &dyn LookupData),
        args.chunk_size,
    )?;
    tracing::info!("... done scoring in {:?}", before_scoring.elapsed());
    stats.log();
    common::trace_rss_now();

    tracing::info!(
        "All of `evidence score` completed in {:?}",
        before_anything.elapsed()
    );

    if stats.fatal > 0 {
        return Err(AppError::FatalEvidence(stats.fatal).into());
    }
    Ok(())
}
