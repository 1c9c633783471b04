//! Unsupervised anomaly detectors
//!
//! - Isolation Forest
//! - Local Outlier Factor (novelty mode)
//!
//! Both expose a decision function where lower values are more anomalous and
//! zero sits at the contamination-implied boundary of the training data.

mod isolation_forest;
mod lof;

pub use isolation_forest::{IsolationForest, IsolationForestParams};
pub use lof::{LocalOutlierFactor, LocalOutlierFactorParams};

use ndarray::{Array1, ArrayView2};

use crate::error::{FraudError, Result};

/// Shared scoring surface of a fitted detector
pub trait AnomalyDetector {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Raw anomaly score per row (lower = more anomalous)
    fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>>;

    /// Score shifted by the offset learned at fit time
    fn offset(&self) -> f64;

    fn decision_function(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let offset = self.offset();
        Ok(self.score_samples(x)? - offset)
    }
}

pub(crate) fn check_contamination(contamination: f64) -> Result<()> {
    if contamination > 0.0 && contamination <= 0.5 {
        Ok(())
    } else {
        Err(FraudError::InvalidContamination(contamination))
    }
}

/// q-quantile with linear interpolation between closest ranks.
/// `q` is a fraction in [0, 1]; NaN for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
