// Main module for transaction anomaly detection. Orchestrates data generation,
// feature derivation, ensemble training, evaluation and the prediction server.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::report::TracingObserver;

mod bundle;
mod config;
mod csv_io;
mod detectors;
mod ensemble;
mod error;
mod evaluate;
mod features;
mod generator;
mod pipeline;
mod report;
mod scaler;
mod server;
mod transaction;
//test module
#[cfg(test)]
mod tests;

#[derive(Parser, Debug)]
#[command(name = "fraud_ensemble", about = "Unsupervised transaction anomaly detection")]
struct Cli {
    /// Configuration file (defaults to config/fraud.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a synthetic transaction table
    Generate {
        #[arg(long)]
        rows: Option<usize>,
    },
    /// Derive the feature table from raw transactions
    Preprocess,
    /// Fit the ensemble, score the feature table and save the bundle
    Train {
        #[arg(long)]
        contamination: Option<f64>,
    },
    /// Log summary statistics of a scored feature table
    Evaluate,
    /// Serve predictions over HTTP
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Generate, preprocess, train and evaluate in one go
    Run,
}

// Installs the global subscriber; RUST_LOG overrides the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// Loads a scored feature table and logs its summary
// Inputs: path of the scored feature CSV
// Outputs: Result indicating success or error
fn evaluate_features(path: &std::path::Path) -> Result<()> {
    let rows = csv_io::read_scored(path)
        .with_context(|| format!("Could not read scored features from {}", path.display()))?;
    let summary = evaluate::summarize(&rows)?;
    evaluate::log_summary(&summary);
    Ok(())
}

// Executes one subcommand against the loaded configuration
// Key steps:
// 1. Resolve paths and overrides from the configuration
// 2. Run the requested stage(s), reporting through a tracing observer
// 3. Abort on the first failing stage
fn run_command(command: Command, mut config: AppConfig) -> Result<()> {
    let mut observer = TracingObserver;
    let paths = config.paths.clone();

    match command {
        Command::Generate { rows } => {
            if let Some(rows) = rows {
                config.generator.rows = rows;
            }
            let now = chrono::Local::now().naive_local();
            pipeline::generate_data(&config.generator, now, &paths.transactions, &mut observer)?;
        }
        Command::Preprocess => {
            pipeline::preprocess(&paths.transactions, &paths.features, &mut observer)?;
        }
        Command::Train { contamination } => {
            if let Some(rate) = contamination {
                config.training.contamination = rate;
            }
            pipeline::train_and_save(&paths.features, &paths.bundle, &config.training, &mut observer)?;
        }
        Command::Evaluate => evaluate_features(&paths.features)?,
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(config.server.bind);
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::serve(paths.bundle, &bind))?;
        }
        Command::Run => {
            let now = chrono::Local::now().naive_local();
            pipeline::generate_data(&config.generator, now, &paths.transactions, &mut observer)?;
            pipeline::preprocess(&paths.transactions, &paths.features, &mut observer)?;
            pipeline::train_and_save(&paths.features, &paths.bundle, &config.training, &mut observer)?;
            evaluate_features(&paths.features)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging.level);
    info!(command = ?cli.command, "Starting");

    if let Err(e) = run_command(cli.command, config) {
        error!(error = %format!("{:#}", e), "Run aborted");
        return Err(e);
    }
    Ok(())
}
