//! Isolation forest anomaly scoring
//!
//! Anomalies are isolated by fewer random axis-aligned splits, so a short
//! average path length maps to a score near 1.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average unsuccessful-search path length in a binary search tree of `n` nodes
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum INode {
    External {
        size: usize,
    },
    Internal {
        feature: usize,
        split: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<INode>,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(data, rows, 0, height_limit, rng);
        tree
    }

    fn build(
        &mut self,
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(INode::External { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        let n_features = data[rows[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let lo = rows.iter().map(|&r| data[r][f]).fold(f64::INFINITY, f64::min);
                let hi = rows
                    .iter()
                    .map(|&r| data[r][f])
                    .fold(f64::NEG_INFINITY, f64::max);
                (hi > lo && (hi - lo).is_finite()).then_some((f, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return id;
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let split = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < split);
        let left = self.build(data, left_rows, depth + 1, height_limit, rng);
        let right = self.build(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = INode::Internal {
            feature,
            split,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                INode::External { size } => return depth + average_path_length(*size),
                INode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    idx = if row[*feature] < *split { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Grow `n_trees` trees on subsamples of `min(max_samples, rows)`
    pub fn fit(data: &[Vec<f64>], n_trees: usize, max_samples: usize, seed: u64) -> Result<Self> {
        if data.len() < 2 {
            return Err(PipelineError::fit("isolation forest needs at least two rows"));
        }
        if n_trees == 0 {
            return Err(PipelineError::fit("isolation forest needs at least one tree"));
        }
        let width = data[0].len();
        if width == 0 || data.iter().any(|r| r.len() != width) {
            return Err(PipelineError::fit("ragged feature matrix"));
        }
        if data.iter().flatten().any(|v| !v.is_finite()) {
            return Err(PipelineError::fit("feature matrix contains non-finite values"));
        }

        let sample_size = max_samples.clamp(2, data.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees)
            .map(|_| {
                let rows = sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::grow(data, rows, height_limit, &mut rng)
            })
            .collect();
        Ok(Self { trees, sample_size })
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))`, in (0, 1]
    pub fn score(&self, row: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.05);
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut data: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![(i % 6) as f64, ((i / 6) % 5) as f64, 1.0])
            .collect();
        data.push(vec![40.0, 35.0, 9.0]);
        let forest = IsolationForest::fit(&data, 100, 256, 42).unwrap();
        let outlier = forest.score(&data[60]);
        let typical = forest.score(&data[10]);
        assert!(outlier > typical, "outlier {} typical {}", outlier, typical);
        assert!(outlier > 0.6);
        assert_eq!(forest.sample_size(), 61);
    }

    #[test]
    fn test_non_finite_rows_are_fit_error() {
        let data = vec![vec![1.0, 2.0], vec![f64::INFINITY, 3.0], vec![2.0, 1.0]];
        assert!(matches!(
            IsolationForest::fit(&data, 10, 256, 1),
            Err(PipelineError::ModelFit(_))
        ));
    }

    #[test]
    fn test_single_row_is_fit_error() {
        assert!(IsolationForest::fit(&[vec![1.0]], 10, 256, 1).is_err());
    }
}
