use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_contamination, quantile, AnomalyDetector};
use crate::error::{FraudError, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful search in a binary search tree of `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One random partitioning tree, stored as a flat node arena (root at 0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(x: ArrayView2<'_, f64>, sample: &mut [usize], max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        let mut tree = IsolationTree { nodes: Vec::new() };
        tree.grow_node(x, sample, 0, max_depth, rng);
        tree
    }

    fn grow_node(
        &mut self,
        x: ArrayView2<'_, f64>,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= max_depth {
            return id;
        }

        // Only features that still vary inside this node can split it
        let candidates: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|feature| {
                let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = x[[r, feature]];
                    (lo.min(v), hi.max(v))
                });
                (max > min).then_some((feature, min, max))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);

        let mut split = 0;
        for k in 0..rows.len() {
            if x[[rows[k], feature]] <= threshold {
                rows.swap(split, k);
                split += 1;
            }
        }

        let (left_rows, right_rows) = rows.split_at_mut(split);
        let left = self.grow_node(x, left_rows, depth + 1, max_depth, rng);
        let right = self.grow_node(x, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], node: usize) -> usize {
            match &nodes[node] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Unfitted isolation forest settings
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl IsolationForestParams {
    pub fn new(contamination: f64) -> Self {
        IsolationForestParams {
            n_estimators: 100,
            max_samples: 256,
            contamination,
            seed: 40,
        }
    }

    pub fn n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&self, x: ArrayView2<'_, f64>) -> Result<IsolationForest> {
        check_contamination(self.contamination)?;
        let n = x.nrows();
        if n == 0 {
            return Err(FraudError::EmptyInput);
        }
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(FraudError::Config(
                "isolation forest needs at least one tree and one sample per tree".to_string(),
            ));
        }

        let sample_size = self.max_samples.min(n);
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let trees: Vec<IsolationTree> = (0..self.n_estimators)
            .map(|_| {
                let mut sample = index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::grow(x, &mut sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            sample_size,
            n_features: x.ncols(),
            offset: 0.0,
        };
        let scores = forest.score_samples(x)?;
        forest.offset = quantile(&scores.to_vec(), self.contamination);

        debug!(
            trees = forest.trees.len(),
            sample_size,
            max_depth,
            offset = forest.offset,
            "Isolation forest fitted"
        );
        Ok(forest)
    }
}

/// Fitted isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn params(contamination: f64) -> IsolationForestParams {
        IsolationForestParams::new(contamination)
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }
}

impl AnomalyDetector for IsolationForest {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(FraudError::ColumnMismatch {
                expected: self.n_features,
                actual: x.ncols(),
            });
        }
        let normaliser = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        let n_trees = self.trees.len() as f64;

        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / n_trees;
                -(2f64.powf(-mean_path / normaliser))
            })
            .collect())
    }

    fn offset(&self) -> f64 {
        self.offset
    }
}
