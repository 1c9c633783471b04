use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_contamination, quantile, AnomalyDetector};
use crate::error::{FraudError, Result};

// Keeps the density finite when every neighbour sits on top of the point
const DENSITY_EPSILON: f64 = 1e-10;

// (training row index, euclidean distance), nearest first
type Neighbourhood = Vec<(usize, f64)>;

fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// k nearest training points for every query row.
/// Ties on distance are ordered by training index.
fn nearest(points: &Array2<f64>, queries: ArrayView2<'_, f64>, k: usize) -> Result<Vec<Neighbourhood>> {
    let index = CommonNearestNeighbour::BallTree
        .from_batch(points, L2Dist)
        .map_err(|e| FraudError::NeighbourSearch(e.to_string()))?;

    queries
        .rows()
        .into_iter()
        .map(|query| {
            let mut found: Neighbourhood = index
                .k_nearest(query, k)
                .map_err(|e| FraudError::NeighbourSearch(e.to_string()))?
                .into_iter()
                .map(|(point, idx)| (idx, euclidean(point, query)))
                .collect();
            found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            Ok::<_, FraudError>(found)
        })
        .collect()
}

fn reachability_density(neighbourhood: &[(usize, f64)], k_distance: &Array1<f64>) -> f64 {
    let mean_reach = neighbourhood
        .iter()
        .map(|&(j, distance)| distance.max(k_distance[j]))
        .sum::<f64>()
        / neighbourhood.len() as f64;
    1.0 / (mean_reach + DENSITY_EPSILON)
}

/// Unfitted local outlier factor settings
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOutlierFactorParams {
    n_neighbors: usize,
    contamination: f64,
}

impl LocalOutlierFactorParams {
    pub fn new(contamination: f64) -> Self {
        LocalOutlierFactorParams {
            n_neighbors: 65,
            contamination,
        }
    }

    pub fn n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = n_neighbors;
        self
    }

    /// Fit in novelty mode: the training points, their k-distances and local
    /// reachability densities are kept so unseen rows can be scored later.
    pub fn fit(&self, x: ArrayView2<'_, f64>) -> Result<LocalOutlierFactor> {
        check_contamination(self.contamination)?;
        let n = x.nrows();
        if n < self.n_neighbors || n < 2 {
            return Err(FraudError::InsufficientRows {
                required: self.n_neighbors.max(2),
                available: n,
            });
        }
        let k = self.n_neighbors.min(n - 1);
        if k < self.n_neighbors {
            warn!(
                requested = self.n_neighbors,
                effective = k,
                rows = n,
                "Neighbourhood shrunk to the number of other training rows"
            );
        }

        let points = x.to_owned();
        // One extra neighbour so each point can drop itself
        let neighbourhoods: Vec<Neighbourhood> = nearest(&points, x, k + 1)?
            .into_iter()
            .enumerate()
            .map(|(i, mut found)| {
                match found.iter().position(|&(j, _)| j == i) {
                    Some(pos) => {
                        found.remove(pos);
                    }
                    None => {
                        found.pop();
                    }
                }
                found.truncate(k);
                found
            })
            .collect();

        let k_distance: Array1<f64> = neighbourhoods
            .iter()
            .map(|found| found.last().map(|&(_, d)| d).unwrap_or(0.0))
            .collect();
        let lrd: Array1<f64> = neighbourhoods
            .iter()
            .map(|found| reachability_density(found, &k_distance))
            .collect();
        let negative_outlier_factor: Vec<f64> = neighbourhoods
            .iter()
            .enumerate()
            .map(|(i, found)| {
                -found.iter().map(|&(j, _)| lrd[j] / lrd[i]).sum::<f64>() / found.len() as f64
            })
            .collect();
        let offset = quantile(&negative_outlier_factor, self.contamination);

        debug!(rows = n, n_neighbors = k, offset, "Local outlier factor fitted");
        Ok(LocalOutlierFactor {
            points,
            k_distance,
            lrd,
            n_neighbors: k,
            offset,
        })
    }
}

/// Fitted local outlier factor (novelty mode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    points: Array2<f64>,
    k_distance: Array1<f64>,
    lrd: Array1<f64>,
    n_neighbors: usize,
    offset: f64,
}

impl LocalOutlierFactor {
    pub fn params(contamination: f64) -> LocalOutlierFactorParams {
        LocalOutlierFactorParams::new(contamination)
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn n_training_rows(&self) -> usize {
        self.points.nrows()
    }
}

impl AnomalyDetector for LocalOutlierFactor {
    fn name(&self) -> &'static str {
        "local_outlier_factor"
    }

    // Every row is treated as a new point, so a training row passed back in
    // counts itself among its neighbours.
    fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.points.ncols() {
            return Err(FraudError::ColumnMismatch {
                expected: self.points.ncols(),
                actual: x.ncols(),
            });
        }
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }

        let neighbourhoods = nearest(&self.points, x, self.n_neighbors)?;
        Ok(neighbourhoods
            .iter()
            .map(|found| {
                let density = reachability_density(found, &self.k_distance);
                -found.iter().map(|&(j, _)| self.lrd[j] / density).sum::<f64>() / found.len() as f64
            })
            .collect())
    }

    fn offset(&self) -> f64 {
        self.offset
    }
}
