//! Allocation Runner CLI
//!
//! Runs one capital allocation pass over a candidate book and prints the
//! selection as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin allocate -- \
//!   --candidates book.json \
//!   --aum 1000000 \
//!   --target-term 90 \
//!   --config allocator.toml \
//!   --summary
//! ```
//!
//! `book.json` is an array of rows with `id`, `amount`, `apr`, `line`,
//! `payer` and optional `term`; other columns are carried through.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 2: Input or configuration error
//! - 3: Runtime error (I/O, including an unreadable config file)

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aum_allocator::{AllocationSummary, Allocator, AllocatorConfig, RawCandidate, Selection};

#[derive(Parser, Debug)]
#[command(name = "allocate")]
#[command(about = "Greedy AUM allocation over a book of loan candidates")]
struct Args {
    /// Path to a JSON array of candidate rows
    #[arg(short, long)]
    candidates: PathBuf,

    /// Capital available to deploy
    #[arg(short, long, env = "ALLOCATOR_AUM", allow_hyphen_values = true)]
    aum: f64,

    /// Only consider candidates with this term
    #[arg(short, long)]
    target_term: Option<i64>,

    /// Path to TOML configuration file (defaults to ALLOCATOR_CONFIG_PATH)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Include the allocation summary in the output
    #[arg(long)]
    summary: bool,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct Output<'a> {
    digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<AllocationSummary>,
    selection: &'a Selection,
}

enum Failure {
    Input(anyhow::Error),
    Runtime(anyhow::Error),
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Input(e)) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
        Err(Failure::Runtime(e)) => {
            error!("{:#}", e);
            ExitCode::from(3)
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("aum_allocator={0},allocate={0}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: &Args) -> Result<(), Failure> {
    let config_path = args.config.clone().or_else(AllocatorConfig::env_path);
    let config = match config_path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading allocator config {}", path.display()))
                .map_err(Failure::Runtime)?;
            AllocatorConfig::from_toml_str(&contents)
                .with_context(|| format!("in {}", path.display()))
                .map_err(Failure::Input)?
        }
        None => AllocatorConfig::default(),
    };

    let allocator = Allocator::new(config).map_err(|e| Failure::Input(e.into()))?;

    let contents = fs::read_to_string(&args.candidates)
        .with_context(|| format!("reading candidates {}", args.candidates.display()))
        .map_err(Failure::Runtime)?;
    let rows: Vec<RawCandidate> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing candidates {}", args.candidates.display()))
        .map_err(Failure::Input)?;

    info!(
        rows = rows.len(),
        aum = args.aum,
        target_term = ?args.target_term,
        "running allocation"
    );

    let selection = allocator
        .optimize_rows(rows, args.aum, args.target_term)
        .map_err(|e| Failure::Input(e.into()))?;

    let output = Output {
        digest: selection.digest(),
        summary: args.summary.then(|| selection.summary()),
        selection: &selection,
    };
    let json = serde_json::to_string_pretty(&output)
        .context("serializing selection")
        .map_err(Failure::Runtime)?;

    match &args.output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("writing {}", path.display()))
                .map_err(Failure::Runtime)?;
            info!("Selection written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json)
                .context("writing selection to stdout")
                .map_err(Failure::Runtime)?;
        }
    }

    Ok(())
}
