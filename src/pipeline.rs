//! Offline pipeline stages: generate, preprocess, train.
//!
//! Every stage reports through the observer it is handed. A failing stage
//! reports the error and returns it; nothing downstream runs and no bundle is
//! written.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::bundle::ScorerBundle;
use crate::config::{GeneratorConfig, TrainingConfig};
use crate::csv_io::{self, ScoredRow};
use crate::ensemble::{EnsembleScorer, VerdictCounts};
use crate::error::Result;
use crate::features::{self, FeatureRow};
use crate::generator;
use crate::report::{RunEvent, RunObserver};
use crate::scaler::Scaler;
use crate::transaction::Transaction;

/// Output of a training run
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub bundle: ScorerBundle,
    pub scored: Vec<ScoredRow>,
    pub counts: VerdictCounts,
}

fn run_stage<T>(
    stage: &'static str,
    observer: &mut dyn RunObserver,
    body: impl FnOnce(&mut dyn RunObserver) -> Result<T>,
) -> Result<T> {
    let result = body(&mut *observer);
    if let Err(error) = &result {
        observer.observe(RunEvent::Failed { stage, error });
    }
    result
}

impl From<&TrainingConfig> for EnsembleScorer {
    fn from(training: &TrainingConfig) -> Self {
        EnsembleScorer::params(training.contamination)
            .n_trees(training.n_trees)
            .max_samples(training.max_samples)
            .seed(training.seed)
            .n_neighbors(training.n_neighbors)
    }
}

pub fn generate_data(
    config: &GeneratorConfig,
    end: NaiveDateTime,
    output: &Path,
    observer: &mut dyn RunObserver,
) -> Result<Vec<Transaction>> {
    run_stage("generate", observer, |observer| {
        let transactions = generator::generate(config, end);
        csv_io::write_transactions(output, &transactions)?;
        observer.observe(RunEvent::DataGenerated {
            path: output,
            rows: transactions.len(),
        });
        Ok(transactions)
    })
}

pub fn derive(transactions: &[Transaction], observer: &mut dyn RunObserver) -> Result<Vec<FeatureRow>> {
    run_stage("derive", observer, |observer| {
        let rows = features::derive_features(transactions)?;
        let customers = rows.iter().map(|r| r.customer_id.as_str()).collect::<HashSet<_>>().len();
        observer.observe(RunEvent::FeaturesDerived {
            rows: rows.len(),
            customers,
        });
        Ok(rows)
    })
}

/// Read raw transactions, derive the feature table and write it out
pub fn preprocess(input: &Path, output: &Path, observer: &mut dyn RunObserver) -> Result<Vec<FeatureRow>> {
    let transactions = run_stage("load", observer, |observer| {
        let transactions = csv_io::read_transactions(input)?;
        observer.observe(RunEvent::TransactionsLoaded {
            path: input,
            rows: transactions.len(),
        });
        Ok(transactions)
    })?;
    let rows = derive(&transactions, observer)?;
    run_stage("preprocess", observer, |_| csv_io::write_features(output, &rows))?;
    Ok(rows)
}

/// Scale the feature table, fit both detectors and score the training rows
pub fn train(rows: &[FeatureRow], training: &TrainingConfig, observer: &mut dyn RunObserver) -> Result<TrainedModel> {
    run_stage("train", observer, |observer| {
        observer.observe(RunEvent::TrainingStarted {
            rows: rows.len(),
            contamination: training.contamination,
        });

        let arrays: Vec<_> = rows.iter().map(FeatureRow::to_array).collect();
        let matrix = features::feature_matrix(&arrays);
        let (scaler, scaled) = Scaler::fit_transform(matrix.view())?;
        let outcome = EnsembleScorer::from(training).fit(scaled.view())?;

        let counts = VerdictCounts::tally(&outcome.verdicts);
        observer.observe(RunEvent::ModelsFitted {
            threshold_iso: outcome.model.threshold_iso(),
            threshold_lof: outcome.model.threshold_lof(),
            counts,
        });

        let scored = rows
            .iter()
            .zip(&outcome.verdicts)
            .map(|(row, &verdict)| ScoredRow::new(row, verdict))
            .collect();
        Ok(TrainedModel {
            bundle: ScorerBundle::new(scaler, outcome.model),
            scored,
            counts,
        })
    })
}

/// Train from a feature CSV, write the scored table back and persist the bundle
pub fn train_and_save(
    features_path: &Path,
    bundle_path: &Path,
    training: &TrainingConfig,
    observer: &mut dyn RunObserver,
) -> Result<TrainedModel> {
    let rows = run_stage("load", observer, |_| csv_io::read_features(features_path))?;
    let trained = train(&rows, training, observer)?;
    run_stage("save", observer, |observer| {
        csv_io::write_scored(features_path, &trained.scored)?;
        trained.bundle.save(bundle_path)?;
        observer.observe(RunEvent::BundleSaved { path: bundle_path });
        Ok(())
    })?;
    Ok(trained)
}
