//! Random forest of bootstrapped CART trees
//!
//! Each tree sees a bootstrap sample of the training rows and a random
//! `sqrt(d)` subset of features at every split. Leaves hold the positive
//! rate of the rows that reach them; the forest averages its trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::family::check_training_rows;
use super::tree::{RegressionTree, SplitSearch, TreeBuilder, TreeParams};
use crate::error::FitError;
use crate::types::MatchRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 10,
            min_samples_leaf: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
    importance: Vec<f64>,
}

impl ForestModel {
    pub fn fit(params: &ForestParams, train: &[MatchRow]) -> Result<Self, FitError> {
        check_training_rows(train, params.min_samples_leaf.max(1) * 2)?;
        if params.n_estimators == 0 {
            return Err(FitError::NumericalInstability(
                "random forest needs at least one tree".to_string(),
            ));
        }

        let n = train.len();
        let width = train[0].features.len();
        let x: Vec<&[f64]> = train.iter().map(|r| r.features.as_slice()).collect();
        // g = -y, h = 1 makes the gain a variance reduction and the leaf a mean
        let grad: Vec<f64> = train.iter().map(|r| -r.target()).collect();
        let hess = vec![1.0; n];

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_leaves: None,
            lambda: 0.0,
            gamma: 0.0,
            min_child_weight: 0.0,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            features_per_split: Some(((width as f64).sqrt().round() as usize).max(1)),
        };
        let features: Vec<usize> = (0..width).collect();
        let builder = TreeBuilder {
            x: &x,
            grad: &grad,
            hess: &hess,
            params: &tree_params,
            search: SplitSearch::Exact,
            features: &features,
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importance = vec![0.0; width];

        for _ in 0..params.n_estimators {
            let sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
            let (tree, gains) = builder.grow(sample, &mut rng);
            for (total, gain) in importance.iter_mut().zip(&gains) {
                *total += gain;
            }
            trees.push(tree);
        }

        Ok(Self { trees, importance })
    }

    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let total: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn importance(&self) -> &[f64] {
        &self.importance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rows(n: usize) -> Vec<MatchRow> {
        (0..n)
            .map(|i| {
                let x = (i * 17 % n) as f64 / n as f64;
                MatchRow {
                    match_id: format!("m{}", i),
                    timestamp: Utc::now(),
                    features: vec![x, (i % 4) as f64, 0.5],
                    label: x > 0.4,
                    odds: 2.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_forest_separates_classes() {
        let params = ForestParams {
            n_estimators: 25,
            ..Default::default()
        };
        let model = ForestModel::fit(&params, &rows(300)).unwrap();

        assert_eq!(model.tree_count(), 25);
        assert!(model.predict_proba(&[0.9, 1.0, 0.5]) > 0.7);
        assert!(model.predict_proba(&[0.1, 1.0, 0.5]) < 0.3);
        assert!(model.importance()[0] > model.importance()[2]);
    }

    #[test]
    fn test_predictions_are_probabilities() {
        let model = ForestModel::fit(&ForestParams::default(), &rows(120)).unwrap();
        for x in [-5.0, 0.0, 0.4, 0.41, 10.0] {
            let p = model.predict_proba(&[x, 0.0, 0.5]);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let result = ForestModel::fit(&ForestParams::default(), &rows(6));
        assert!(matches!(result, Err(FitError::InsufficientData { .. })));
    }
}
