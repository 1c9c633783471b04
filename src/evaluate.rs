use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, Axis};
use tracing::info;

use crate::csv_io::ScoredRow;
use crate::error::{FraudError, Result};
use crate::features::{feature_matrix, FEATURE_COLUMNS, N_FEATURES};

/// Per-feature descriptive statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: &'static str,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
    /// Pearson correlation between feature columns, NaN for constant columns
    pub correlation: Array2<f64>,
    pub detected: usize,
    pub flagged_customers: usize,
}

fn summarize_column(name: &'static str, column: ArrayView1<'_, f64>) -> ColumnSummary {
    let n = column.len() as f64;
    let mean = column.sum() / n;
    let std = if column.len() > 1 {
        (column.mapv(|x| (x - mean).powi(2)).sum() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    ColumnSummary {
        name,
        mean,
        std,
        min: column.fold(f64::INFINITY, |a, &b| a.min(b)),
        max: column.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
    }
}

fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let mean_a = a.sum() / a.len() as f64;
    let mean_b = b.sum() / b.len() as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    cov / (var_a * var_b).sqrt()
}

pub fn summarize(rows: &[ScoredRow]) -> Result<DatasetSummary> {
    if rows.is_empty() {
        return Err(FraudError::EmptyInput);
    }
    let arrays: Vec<_> = rows.iter().map(ScoredRow::to_array).collect();
    let matrix = feature_matrix(&arrays);

    let columns = FEATURE_COLUMNS
        .iter()
        .zip(matrix.axis_iter(Axis(1)))
        .map(|(&name, column)| summarize_column(name, column))
        .collect();
    let correlation = Array2::from_shape_fn((N_FEATURES, N_FEATURES), |(i, j)| {
        pearson(matrix.column(i), matrix.column(j))
    });

    let detected = rows.iter().map(|r| r.both_prediction as usize).sum();
    let flagged_customers = rows
        .iter()
        .filter(|r| r.forest_prediction == 1)
        .map(|r| r.customer_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    Ok(DatasetSummary {
        rows: rows.len(),
        columns,
        correlation,
        detected,
        flagged_customers,
    })
}

pub fn log_summary(summary: &DatasetSummary) {
    info!(rows = summary.rows, "Dataset info");
    for c in &summary.columns {
        info!(
            column = c.name,
            mean = %format!("{:.4}", c.mean),
            std = %format!("{:.4}", c.std),
            min = c.min,
            max = c.max,
            "Summary statistics"
        );
    }
    for (name, row) in FEATURE_COLUMNS.iter().zip(summary.correlation.rows()) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:.2}", v)).collect();
        info!(column = *name, correlations = %cells.join(" "), "Correlation");
    }
    info!(
        detected = summary.detected,
        total = summary.rows,
        flagged_customers = summary.flagged_customers,
        "Detected fraudulent transactions"
    );
}
