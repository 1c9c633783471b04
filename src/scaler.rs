use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{FraudError, Result};
use crate::features::{FEATURE_COLUMNS, N_FEATURES};

/// Per-feature standardization fitted once on the training table.
/// The same parameters are applied at training and inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Scaler {
    // Mean and population standard deviation per column.
    // A constant column is a fit error rather than a silent division by zero.
    pub fn fit(features: ArrayView2<'_, f64>) -> Result<Self> {
        check_columns(features)?;
        let n = features.nrows();
        if n == 0 {
            return Err(FraudError::EmptyInput);
        }

        let mean = features.sum_axis(Axis(0)) / n as f64;
        let variance = features
            .axis_iter(Axis(0))
            .fold(Array1::zeros(N_FEATURES), |acc, row| {
                acc + (&row - &mean).mapv(|d| d * d)
            })
            / n as f64;
        let std = variance.mapv(f64::sqrt);

        if let Some(column) = std.iter().position(|&s| s == 0.0 || !s.is_finite()) {
            return Err(FraudError::ZeroVariance {
                column: FEATURE_COLUMNS[column].to_string(),
            });
        }

        Ok(Scaler { mean, std })
    }

    pub fn transform(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_columns(features)?;
        Ok((&features - &self.mean) / &self.std)
    }

    pub fn fit_transform(features: ArrayView2<'_, f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Scaler::fit(features)?;
        let scaled = scaler.transform(features)?;
        Ok((scaler, scaled))
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }
}

fn check_columns(features: ArrayView2<'_, f64>) -> Result<()> {
    if features.ncols() != N_FEATURES {
        return Err(FraudError::ColumnMismatch {
            expected: N_FEATURES,
            actual: features.ncols(),
        });
    }
    Ok(())
}
