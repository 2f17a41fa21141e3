//! Evidence association worker main executable

pub mod assoc;
pub mod common;
pub mod conf;
pub mod err;
pub mod evidence;
pub mod lookup;
pub mod normalise;
pub mod pipeline;

use std::process::{ExitCode, Termination};

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Evidence scoring and target-disease association",
    long_about = "This tool scores evidence records and aggregates them into target-disease associations"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Evidence-related commands.
    Evidence(Evidence),
    /// Association-related commands.
    Assoc(Assoc),
    /// Configuration-related commands.
    Conf(Conf),
}

/// Parsing of "evidence *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Evidence {
    /// The sub command to run
    #[command(subcommand)]
    command: EvidenceCommands,
}

/// Enum supporting the parsing of "evidence *" sub commands.
#[derive(Debug, Subcommand)]
enum EvidenceCommands {
    Score(evidence::Args),
}

/// Parsing of "assoc *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Assoc {
    /// The sub command to run
    #[command(subcommand)]
    command: AssocCommands,
}

/// Enum supporting the parsing of "assoc *" sub commands.
#[derive(Debug, Subcommand)]
enum AssocCommands {
    Compute(assoc::Args),
}

/// Parsing of "conf *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Conf {
    /// The sub command to run
    #[command(subcommand)]
    command: ConfCommands,
}

/// Enum supporting the parsing of "conf *" sub commands.
#[derive(Debug, Subcommand)]
enum ConfCommands {
    Default(conf::Args),
}

fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    match &cli.command {
        Commands::Evidence(evidence) => match &evidence.command {
            EvidenceCommands::Score(args) => evidence::run(&cli.common, args)?,
        },
        Commands::Assoc(assoc) => match &assoc.command {
            AssocCommands::Compute(args) => assoc::run(&cli.common, args)?,
        },
        Commands::Conf(conf) => match &conf.command {
            ConfCommands::Default(args) => conf::run(&cli.common, args)?,
        },
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || {
        let result = run(&cli);
        if let Err(e) = &result {
            tracing::error!("{:#}", e);
        }
        result
    });

    match result {
        Ok(()) => {
            // Ignore failure to write the farewell.
            let _ = term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")));
            ExitCode::SUCCESS
        }
        Err(e) => match e.downcast::<err::AppError>() {
            Ok(app_error) => app_error.report(),
            Err(_) => ExitCode::FAILURE,
        },
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_subcommands() {
        let cli = Cli::parse_from([
            "evidence-association-worker",
            "assoc",
            "compute",
            "--path-evidence",
            "@inputs.txt",
            "--path-output-dir",
            "out",
            "--target",
            "ENSG00000157764",
            "--append",
        ]);
        match cli.command {
            Commands::Assoc(Assoc {
                command: AssocCommands::Compute(args),
            }) => {
                assert_eq!(args.path_evidence, vec!["@inputs.txt"]);
                assert_eq!(args.target, vec!["ENSG00000157764"]);
                assert_eq!(args.index_name, "association-data");
                assert!(args.append);
            }
            _ => panic!("wrong sub command"),
        }

        assert!(Cli::try_parse_from(["evidence-association-worker", "evidence", "score"]).is_err());
        assert!(Cli::try_parse_from(["evidence-association-worker", "conf", "default"]).is_ok());
    }
}
