//! Two-detector ensemble: an isolation forest and a local outlier factor fitted
//! on the same scaled features, each with a threshold taken from the
//! contamination quantile of its own training scores. A row is fraud when
//! either detector puts it below its threshold.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detectors::{
    quantile, AnomalyDetector, IsolationForest, IsolationForestParams, LocalOutlierFactor,
    LocalOutlierFactorParams,
};
use crate::error::Result;

/// Which detectors flagged a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Forest,
    Lof,
    Both,
}

impl Verdict {
    pub fn from_flags(forest: bool, lof: bool) -> Self {
        match (forest, lof) {
            (false, false) => Verdict::Normal,
            (true, false) => Verdict::Forest,
            (false, true) => Verdict::Lof,
            (true, true) => Verdict::Both,
        }
    }

    pub fn forest_flag(&self) -> u8 {
        u8::from(matches!(self, Verdict::Forest | Verdict::Both))
    }

    pub fn lof_flag(&self) -> u8 {
        u8::from(matches!(self, Verdict::Lof | Verdict::Both))
    }

    /// Union of the two votes, as reported in `Both_prediction`
    pub fn combined_flag(&self) -> u8 {
        u8::from(*self != Verdict::Normal)
    }

    pub fn is_fraud(&self) -> bool {
        *self != Verdict::Normal
    }
}

/// Per-row decision scores from both detectors
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleScores {
    pub forest: Vec<f64>,
    pub lof: Vec<f64>,
}

/// Counts of flagged rows per detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictCounts {
    pub forest: usize,
    pub lof: usize,
    pub combined: usize,
}

impl VerdictCounts {
    pub fn tally(verdicts: &[Verdict]) -> Self {
        verdicts.iter().fold(VerdictCounts::default(), |mut counts, v| {
            counts.forest += v.forest_flag() as usize;
            counts.lof += v.lof_flag() as usize;
            counts.combined += v.combined_flag() as usize;
            counts
        })
    }
}

/// Unfitted ensemble settings. Each `fit` builds a new `FittedEnsemble`;
/// a fitted ensemble is never refitted in place.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleScorer {
    contamination: f64,
    forest: IsolationForestParams,
    lof: LocalOutlierFactorParams,
}

impl EnsembleScorer {
    pub fn params(contamination: f64) -> Self {
        EnsembleScorer {
            contamination,
            forest: IsolationForest::params(contamination),
            lof: LocalOutlierFactor::params(contamination),
        }
    }

    pub fn n_trees(mut self, n_trees: usize) -> Self {
        self.forest = self.forest.n_estimators(n_trees);
        self
    }

    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.forest = self.forest.max_samples(max_samples);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.forest = self.forest.seed(seed);
        self
    }

    pub fn n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.lof = self.lof.n_neighbors(n_neighbors);
        self
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Fit both detectors on the scaled training matrix and derive thresholds.
    pub fn fit(&self, scaled: ArrayView2<'_, f64>) -> Result<TrainingOutcome> {
        let forest = self.forest.fit(scaled)?;
        let forest_scores = forest.decision_function(scaled)?.to_vec();
        let threshold_iso = quantile(&forest_scores, self.contamination);
        info!(
            detector = forest.name(),
            threshold = threshold_iso,
            "Detector fitted"
        );

        let lof = self.lof.fit(scaled)?;
        let lof_scores = lof.decision_function(scaled)?.to_vec();
        let threshold_lof = quantile(&lof_scores, self.contamination);
        info!(
            detector = lof.name(),
            threshold = threshold_lof,
            n_neighbors = lof.n_neighbors(),
            "Detector fitted"
        );

        let model = FittedEnsemble {
            forest,
            lof,
            threshold_iso,
            threshold_lof,
        };
        let scores = EnsembleScores {
            forest: forest_scores,
            lof: lof_scores,
        };
        let verdicts = model.verdicts(&scores);
        Ok(TrainingOutcome {
            model,
            scores,
            verdicts,
        })
    }
}

/// Result of fitting: the model plus the scores and verdicts of the training rows
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: FittedEnsemble,
    pub scores: EnsembleScores,
    pub verdicts: Vec<Verdict>,
}

/// Both fitted detectors with their stored thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedEnsemble {
    forest: IsolationForest,
    lof: LocalOutlierFactor,
    threshold_iso: f64,
    threshold_lof: f64,
}

impl FittedEnsemble {
    pub fn threshold_iso(&self) -> f64 {
        self.threshold_iso
    }

    pub fn threshold_lof(&self) -> f64 {
        self.threshold_lof
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    pub fn lof(&self) -> &LocalOutlierFactor {
        &self.lof
    }

    pub fn score(&self, scaled: ArrayView2<'_, f64>) -> Result<EnsembleScores> {
        Ok(EnsembleScores {
            forest: self.forest.decision_function(scaled)?.to_vec(),
            lof: self.lof.decision_function(scaled)?.to_vec(),
        })
    }

    pub fn verdicts(&self, scores: &EnsembleScores) -> Vec<Verdict> {
        scores
            .forest
            .iter()
            .zip(&scores.lof)
            .map(|(&iso, &lof)| Verdict::from_flags(iso < self.threshold_iso, lof < self.threshold_lof))
            .collect()
    }

    /// Score already-scaled rows against the stored detectors and thresholds.
    pub fn predict(&self, scaled: ArrayView2<'_, f64>) -> Result<Vec<Verdict>> {
        let scores = self.score(scaled)?;
        Ok(self.verdicts(&scores))
    }
}
