// Run reporting. Pipeline stages receive an observer instead of writing to a
// process-wide logger, so callers decide where stage summaries go.
use std::path::Path;

use tracing::{error, info};

use crate::ensemble::VerdictCounts;
use crate::error::FraudError;

#[derive(Debug)]
pub enum RunEvent<'a> {
    DataGenerated { path: &'a Path, rows: usize },
    TransactionsLoaded { path: &'a Path, rows: usize },
    FeaturesDerived { rows: usize, customers: usize },
    TrainingStarted { rows: usize, contamination: f64 },
    ModelsFitted { threshold_iso: f64, threshold_lof: f64, counts: VerdictCounts },
    BundleSaved { path: &'a Path },
    Failed { stage: &'static str, error: &'a FraudError },
}

pub trait RunObserver {
    fn observe(&mut self, event: RunEvent<'_>);
}

/// Forwards every event to `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn observe(&mut self, event: RunEvent<'_>) {
        match event {
            RunEvent::DataGenerated { path, rows } => {
                info!(path = %path.display(), rows, "Generated and saved data")
            }
            RunEvent::TransactionsLoaded { path, rows } => {
                info!(path = %path.display(), rows, "Transactions loaded")
            }
            RunEvent::FeaturesDerived { rows, customers } => {
                info!(rows, customers, "Features derived")
            }
            RunEvent::TrainingStarted { rows, contamination } => {
                info!(rows, contamination, "Training models")
            }
            RunEvent::ModelsFitted {
                threshold_iso,
                threshold_lof,
                counts,
            } => info!(
                threshold_iso,
                threshold_lof,
                forest = counts.forest,
                lof = counts.lof,
                both = counts.combined,
                "Models fitted"
            ),
            RunEvent::BundleSaved { path } => info!(path = %path.display(), "Bundle saved"),
            RunEvent::Failed { stage, error } => error!(stage, error = %error, "Stage failed"),
        }
    }
}

/// Keeps a one-line summary of every event, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<String>,
}

#[cfg(test)]
impl RunObserver for RecordingObserver {
    fn observe(&mut self, event: RunEvent<'_>) {
        let line = match event {
            RunEvent::DataGenerated { rows, .. } => format!("generated {}", rows),
            RunEvent::TransactionsLoaded { rows, .. } => format!("loaded {}", rows),
            RunEvent::FeaturesDerived { rows, customers } => format!("features {} {}", rows, customers),
            RunEvent::TrainingStarted { rows, .. } => format!("training {}", rows),
            RunEvent::ModelsFitted { counts, .. } => format!("fitted {}", counts.combined),
            RunEvent::BundleSaved { .. } => "saved".to_string(),
            RunEvent::Failed { stage, .. } => format!("failed {}", stage),
        };
        self.events.push(line);
    }
}
