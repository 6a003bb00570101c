//! Random forest regression
//!
//! Bootstrap-aggregated CART regression trees:
//! - variance-reduction splits over a random feature subset per node
//! - mean-decrease-impurity feature importance
//! - out-of-bag R² as a generalization estimate

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::stats::{mean, r_squared, std_dev, total_cmp};
use crate::error::{PipelineError, Result};

const MIN_GAIN: f64 = 1e-12;

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means ⌈n_features / 3⌉
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_leaf: 2,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    max_depth: usize,
    min_leaf: usize,
    max_features: usize,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let node_id = self.nodes.len();
        let values: Vec<f64> = indices.iter().map(|&i| self.y[i]).collect();
        self.nodes.push(Node::Leaf(mean(&values)));

        if depth >= self.max_depth || indices.len() < 2 * self.min_leaf {
            return node_id;
        }
        let parent_sse = sum_squared_error(&values);
        if parent_sse <= MIN_GAIN {
            return node_id;
        }

        let Some(split) = self.best_split(&indices, parent_sse) else {
            return node_id;
        };
        self.importance[split.feature] += split.gain;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);
        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn best_split(&mut self, indices: &[usize], parent_sse: f64) -> Option<SplitCandidate> {
        let n_features = self.x[0].len();
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(self.rng);
        features.truncate(self.max_features);

        let mut best: Option<SplitCandidate> = None;
        for &feature in &features {
            let mut sorted: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (self.x[i][feature], self.y[i]))
                .collect();
            sorted.sort_by(|a, b| total_cmp(&a.0, &b.0));

            let n = sorted.len();
            let total_sum: f64 = sorted.iter().map(|(_, y)| y).sum();
            let total_sq: f64 = sorted.iter().map(|(_, y)| y * y).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                left_sum += sorted[k].1;
                left_sq += sorted[k].1 * sorted[k].1;
                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < self.min_leaf || n_right < self.min_leaf {
                    continue;
                }
                if sorted[k].0 >= sorted[k + 1].0 {
                    continue;
                }
                let left_sse = left_sq - left_sum * left_sum / n_left as f64;
                let right_sum = total_sum - left_sum;
                let right_sse = (total_sq - left_sq) - right_sum * right_sum / n_right as f64;
                let gain = parent_sse - left_sse - right_sse;
                let better = best.as_ref().map(|b| gain > b.gain).unwrap_or(true);
                if gain > MIN_GAIN && better {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (sorted[k].0 + sorted[k + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn sum_squared_error(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum()
}

/// Fitted random forest
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    importances: Vec<f64>,
    oob_r2: Option<f64>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: &ForestConfig) -> Result<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(PipelineError::fit("random forest needs matching non-empty x and y"));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(PipelineError::fit("ragged feature matrix"));
        }
        if config.n_trees == 0 {
            return Err(PipelineError::fit("random forest needs at least one tree"));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(PipelineError::fit("non-finite training value"));
        }

        let max_features = config
            .max_features
            .unwrap_or((n_features + 2) / 3)
            .clamp(1, n_features);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.n_trees);
        let mut importance_total = vec![0.0; n_features];
        let mut oob_sum = vec![0.0; n];
        let mut oob_count = vec![0usize; n];

        for _ in 0..config.n_trees {
            let mut in_bag = vec![false; n];
            let sample: Vec<usize> = (0..n)
                .map(|_| {
                    let i = rng.gen_range(0..n);
                    in_bag[i] = true;
                    i
                })
                .collect();

            let mut builder = TreeBuilder {
                x,
                y,
                max_depth: config.max_depth,
                min_leaf: config.min_samples_leaf.max(1),
                max_features,
                rng: &mut rng,
                nodes: Vec::new(),
                importance: vec![0.0; n_features],
            };
            builder.build(sample, 0);
            let tree = RegressionTree {
                nodes: builder.nodes,
            };

            let tree_total: f64 = builder.importance.iter().sum();
            if tree_total > 0.0 {
                for (acc, imp) in importance_total.iter_mut().zip(&builder.importance) {
                    *acc += imp / tree_total;
                }
            }

            for i in 0..n {
                if !in_bag[i] {
                    oob_sum[i] += tree.predict(&x[i]);
                    oob_count[i] += 1;
                }
            }
            trees.push(tree);
        }

        let total: f64 = importance_total.iter().sum();
        let importances = if total > 0.0 {
            importance_total.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / n_features as f64; n_features]
        };

        let (actual, predicted): (Vec<f64>, Vec<f64>) = (0..n)
            .filter(|&i| oob_count[i] > 0)
            .map(|i| (y[i], oob_sum[i] / oob_count[i] as f64))
            .unzip();
        let oob_r2 = if actual.len() >= 2 {
            Some(r_squared(&actual, &predicted))
        } else {
            None
        };

        Ok(Self {
            trees,
            n_features,
            importances,
            oob_r2,
        })
    }

    /// Per-tree predictions for one row
    pub fn predict_trees(&self, row: &[f64]) -> Vec<f64> {
        debug_assert_eq!(row.len(), self.n_features);
        self.trees.iter().map(|t| t.predict(row)).collect()
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        mean(&self.predict_trees(row))
    }

    /// Mean prediction with a 95% band from the spread of tree outputs
    pub fn predict_interval(&self, row: &[f64]) -> (f64, f64, f64) {
        let outputs = self.predict_trees(row);
        let center = mean(&outputs);
        let half = 1.96 * std_dev(&outputs);
        (center, center - half, center + half)
    }

    /// Normalized impurity-based importances, summing to 1
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn oob_r2(&self) -> Option<f64> {
        self.oob_r2
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // target depends only on feature 0
        let x: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![(i % 10) as f64, ((i * 7) % 5) as f64])
            .collect();
        let y: Vec<f64> = x
            .iter()
            .map(|r| if r[0] < 5.0 { 10.0 } else { 50.0 })
            .collect();
        (x, y)
    }

    #[test]
    fn test_forest_learns_step_function() {
        let (x, y) = step_data();
        let config = ForestConfig {
            n_trees: 30,
            ..Default::default()
        };
        let forest = RandomForest::fit(&x, &y, &config).unwrap();
        assert!((forest.predict(&[1.0, 2.0]) - 10.0).abs() < 5.0);
        assert!((forest.predict(&[8.0, 2.0]) - 50.0).abs() < 5.0);
        let imp = forest.feature_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
        assert!(forest.oob_r2().unwrap() > 0.8);
    }

    #[test]
    fn test_forest_is_deterministic_for_seed() {
        let (x, y) = step_data();
        let config = ForestConfig {
            n_trees: 10,
            ..Default::default()
        };
        let a = RandomForest::fit(&x, &y, &config).unwrap();
        let b = RandomForest::fit(&x, &y, &config).unwrap();
        assert_eq!(a.predict(&[4.5, 1.0]), b.predict(&[4.5, 1.0]));
        assert_eq!(a.feature_importances(), b.feature_importances());
    }

    #[test]
    fn test_constant_target_gives_uniform_importance() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0, 2.0]).collect();
        let y = vec![3.0; 20];
        let forest = RandomForest::fit(&x, &y, &ForestConfig::default()).unwrap();
        for imp in forest.feature_importances() {
            assert!((imp - 1.0 / 3.0).abs() < 1e-12);
        }
        let (center, lower, upper) = forest.predict_interval(&[5.0, 1.0, 2.0]);
        assert_eq!(center, 3.0);
        assert!(lower <= center && center <= upper);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RandomForest::fit(&[], &[], &ForestConfig::default()).is_err());
        let x = vec![vec![1.0], vec![f64::NAN]];
        assert!(RandomForest::fit(&x, &[1.0, 2.0], &ForestConfig::default()).is_err());
    }
}
