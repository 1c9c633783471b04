//! Configuration for the offline pipeline and the prediction server

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/fraud.toml";

/// Main application configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub training: TrainingConfig,
    pub generator: GeneratorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Where each pipeline stage reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw transactions, as generated or ingested
    pub transactions: PathBuf,
    /// Derived feature table, with prediction columns after training
    pub features: PathBuf,
    /// Persisted scorer bundle
    pub bundle: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            transactions: PathBuf::from("cleaned_transactions.csv"),
            features: PathBuf::from("transactions_enhanced.csv"),
            bundle: PathBuf::from("models/ensemble.bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Expected fraction of anomalous rows
    pub contamination: f64,
    /// Isolation forest seed
    pub seed: u64,
    pub n_trees: usize,
    /// Rows drawn per tree (capped at the table size)
    pub max_samples: usize,
    /// Local outlier factor neighbourhood size
    pub n_neighbors: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            contamination: 0.02,
            seed: 40,
            n_trees: 100,
            max_samples: 256,
            n_neighbors: 65,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub rows: usize,
    /// Customer ids are drawn from 0..=customers
    pub customers: u32,
    pub seed: u64,
    /// Mean of the exponential amount distribution
    pub amount_scale: f64,
    /// Amounts at or above this are filtered out
    pub amount_cap: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            rows: 80_000,
            customers: 15_000,
            seed: 42,
            amount_scale: 300.0,
            amount_cap: crate::transaction::AMOUNT_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error); RUST_LOG wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (required) or the default location (optional), then
    /// apply `FRAUD__SECTION__KEY` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("FRAUD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
