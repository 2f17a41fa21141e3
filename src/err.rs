use std::process::{ExitCode, Termination};

/// Run-level failures that are reported with a dedicated exit code.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("{0} evidence records failed with fatal data errors")]
    FatalEvidence(usize),
    #[error("{0} documents could not be written to the sink")]
    SinkFailures(usize),
    #[error("{failed} pipeline jobs failed, at most {max} allowed")]
    TooManyFailedJobs { failed: usize, max: usize },
    #[error("nothing to aggregate: {0}")]
    NothingToAggregate(String),
}

impl Termination for AppError {
    fn report(self) -> ExitCode {
        match self {
            AppError::FatalEvidence(_) => ExitCode::from(2),
            AppError::SinkFailures(_) => ExitCode::from(3),
            AppError::TooManyFailedJobs { .. } => ExitCode::from(4),
            AppError::NothingToAggregate(_) => ExitCode::from(5),
        }
    }
}
