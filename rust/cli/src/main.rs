use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use fmha_cli::{CliError, RunReport, run_config};
use fmha_config::{RunConfig, SweepConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fmha", about = "Run, check and time fused attention kernels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single problem described by flags or a TOML file
    Run {
        /// TOML file with the run; replaces the problem flags
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        run: RunConfig,
    },
    /// Run every entry of a sweep file
    Sweep {
        /// TOML file with `[defaults]` and `[[runs]]`
        #[arg(long)]
        config: PathBuf,
        /// Print one JSON report per line
        #[arg(long)]
        json: bool,
        /// Keep going after a run fails to launch
        #[arg(long)]
        keep_going: bool,
    },
}

fn emit(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("failed to serialize report: {e}"),
        }
    } else {
        report.print();
    }
}

fn run(config: Option<PathBuf>, json: bool, run: RunConfig) -> Result<bool, CliError> {
    let run = match config {
        Some(path) => RunConfig::load(path)?,
        None => run,
    };
    let report = run_config(&run)?;
    emit(&report, json);
    Ok(report.passed())
}

fn sweep(config: PathBuf, json: bool, keep_going: bool) -> Result<bool, CliError> {
    let sweep = SweepConfig::load(&config)?;
    info!(path = %config.display(), runs = sweep.runs.len(), "loaded sweep");

    let (mut passed, mut failed) = (0usize, 0usize);
    for run in &sweep.runs {
        match run_config(run) {
            Ok(report) => {
                emit(&report, json);
                if report.passed() {
                    passed += 1;
                } else {
                    failed += 1;
                }
            }
            Err(e) if keep_going => {
                error!(name = %run.name, "{e}");
                failed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    info!(passed, failed, "sweep done");
    Ok(failed == 0)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { config, json, run: cfg } => run(config, json, cfg),
        Commands::Sweep {
            config,
            json,
            keep_going,
        } => sweep(config, json, keep_going),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("output differs from the reference");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
