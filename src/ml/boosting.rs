//! Gradient boosted trees on the logistic loss
//!
//! Two growth strategies share one booster:
//! - depth-wise: exact split search, trees grown until `max_depth`
//! - leaf-wise: histogram split search, best-first growth capped at `max_leaves`
//!
//! When `early_stopping_rounds` is set and a validation segment is supplied,
//! boosting stops once validation log loss has not improved for that many
//! rounds and the ensemble is truncated to the best round.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::family::{check_training_rows, logit, sigmoid};
use super::tree::{sample_without_replacement, FeatureBins, RegressionTree, SplitSearch, TreeBuilder, TreeParams};
use crate::error::FitError;
use crate::types::MatchRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeGrowth {
    DepthWise,
    LeafWise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Row sampling rate per round
    pub subsample: f64,
    /// Feature sampling rate per tree
    pub colsample_bytree: f64,
    /// L2 penalty on leaf values
    pub lambda: f64,
    /// Minimum split gain
    pub gamma: f64,
    pub min_child_weight: f64,
    pub early_stopping_rounds: Option<usize>,
    /// Leaf cap for leaf-wise growth
    pub max_leaves: usize,
    /// Histogram resolution for leaf-wise growth
    pub max_bin: usize,
    pub seed: u64,
}

impl BoostingParams {
    pub fn depth_wise() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 6,
            learning_rate: 0.05,
            subsample: 0.8,
            colsample_bytree: 0.8,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            early_stopping_rounds: Some(20),
            max_leaves: 31,
            max_bin: 255,
            seed: 42,
        }
    }

    pub fn leaf_wise() -> Self {
        Self {
            early_stopping_rounds: None,
            ..Self::depth_wise()
        }
    }

    fn validate(&self) -> Result<(), FitError> {
        let in_unit = |r: f64| r > 0.0 && r <= 1.0;
        if self.n_estimators == 0
            || !(self.learning_rate > 0.0)
            || !in_unit(self.subsample)
            || !in_unit(self.colsample_bytree)
            || self.lambda < 0.0
        {
            return Err(FitError::NumericalInstability(format!(
                "invalid boosting parameters: {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self::depth_wise()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    /// Total split gain per feature over the kept trees
    importance: Vec<f64>,
    /// Rounds kept after early stopping; `None` when it was not applied
    best_iteration: Option<usize>,
}

impl BoostedModel {
    pub fn fit(
        params: &BoostingParams,
        growth: TreeGrowth,
        train: &[MatchRow],
        validation: &[MatchRow],
    ) -> Result<Self, FitError> {
        check_training_rows(train, 2)?;
        params.validate()?;

        let n = train.len();
        let width = train[0].features.len();
        let x: Vec<&[f64]> = train.iter().map(|r| r.features.as_slice()).collect();
        let y: Vec<f64> = train.iter().map(MatchRow::target).collect();

        let base_score = logit(y.iter().sum::<f64>() / n as f64);
        let mut scores = vec![base_score; n];

        let early_stopping = params.early_stopping_rounds.filter(|_| !validation.is_empty());
        let mut val_scores = vec![base_score; validation.len()];
        let mut best_loss = early_stopping.map(|_| validation_loss(validation, &val_scores));
        let mut best_round = 0;

        let bins = match growth {
            TreeGrowth::LeafWise => Some(FeatureBins::new(&x, params.max_bin)),
            TreeGrowth::DepthWise => None,
        };
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_leaves: match growth {
                TreeGrowth::LeafWise => Some(params.max_leaves.max(2)),
                TreeGrowth::DepthWise => None,
            },
            lambda: params.lambda,
            gamma: params.gamma,
            min_child_weight: params.min_child_weight,
            min_samples_split: 2,
            min_samples_leaf: 1,
            features_per_split: None,
        };

        let all_features: Vec<usize> = (0..width).collect();
        let features_per_tree = ((width as f64 * params.colsample_bytree).ceil() as usize).clamp(1, width.max(1));
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut tree_importance = Vec::with_capacity(params.n_estimators);
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for round in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(scores[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let mut rows: Vec<usize> = (0..n).filter(|_| rng.random::<f64>() < params.subsample).collect();
            if rows.is_empty() {
                rows = (0..n).collect();
            }
            let features = sample_without_replacement(&all_features, features_per_tree, &mut rng);

            let builder = TreeBuilder {
                x: &x,
                grad: &grad,
                hess: &hess,
                params: &tree_params,
                search: match &bins {
                    Some(b) => SplitSearch::Histogram(b),
                    None => SplitSearch::Exact,
                },
                features: &features,
            };
            let (tree, importance) = builder.grow(rows, &mut rng);

            for (score, row) in scores.iter_mut().zip(&x) {
                *score += params.learning_rate * tree.predict(row);
            }
            if scores.iter().any(|s| !s.is_finite()) {
                return Err(FitError::NumericalInstability(format!(
                    "non-finite scores after round {}",
                    round + 1
                )));
            }

            if let (Some(rounds), Some(best)) = (early_stopping, best_loss) {
                for (score, row) in val_scores.iter_mut().zip(validation) {
                    *score += params.learning_rate * tree.predict(&row.features);
                }
                let loss = validation_loss(validation, &val_scores);
                trees.push(tree);
                tree_importance.push(importance);

                if loss < best {
                    best_loss = Some(loss);
                    best_round = round + 1;
                } else if round + 1 - best_round >= rounds {
                    tracing::debug!(best_round, rounds = round + 1, "Early stopping triggered");
                    break;
                }
            } else {
                trees.push(tree);
                tree_importance.push(importance);
            }
        }

        let best_iteration = early_stopping.map(|_| best_round);
        if let Some(keep) = best_iteration {
            trees.truncate(keep);
            tree_importance.truncate(keep);
        }

        let mut importance = vec![0.0; width];
        for per_tree in &tree_importance {
            for (total, gain) in importance.iter_mut().zip(per_tree) {
                *total += gain;
            }
        }

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            trees,
            importance,
            best_iteration,
        })
    }

    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let raw: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        sigmoid(self.base_score + self.learning_rate * raw)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    pub fn importance(&self) -> &[f64] {
        &self.importance
    }
}

fn validation_loss(rows: &[MatchRow], scores: &[f64]) -> f64 {
    let n = rows.len().max(1) as f64;
    rows.iter()
        .zip(scores)
        .map(|(row, s)| {
            let p = sigmoid(*s).clamp(1e-15, 1.0 - 1e-15);
            if row.label {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rows(n: usize, flip: bool) -> Vec<MatchRow> {
        (0..n)
            .map(|i| {
                let x = (i * 13 % n) as f64 / n as f64;
                let noise = ((i * 7) % 3) as f64;
                MatchRow {
                    match_id: format!("m{}", i),
                    timestamp: Utc::now(),
                    features: vec![x, noise],
                    label: (x > 0.5) != flip,
                    odds: 2.0,
                }
            })
            .collect()
    }

    fn small(params: BoostingParams) -> BoostingParams {
        BoostingParams {
            n_estimators: 40,
            learning_rate: 0.3,
            max_depth: 3,
            ..params
        }
    }

    #[test]
    fn test_depth_wise_learns_threshold() {
        let train = rows(200, false);
        let model = BoostedModel::fit(&small(BoostingParams::depth_wise()), TreeGrowth::DepthWise, &train, &[]).unwrap();

        assert!(model.predict_proba(&[0.9, 1.0]) > 0.8);
        assert!(model.predict_proba(&[0.1, 1.0]) < 0.2);
        // No validation rows: early stopping is not applied
        assert_eq!(model.best_iteration(), None);
        assert_eq!(model.tree_count(), 40);
        assert!(model.importance()[0] > model.importance()[1]);
    }

    #[test]
    fn test_leaf_wise_learns_threshold() {
        let train = rows(200, false);
        let params = BoostingParams {
            max_leaves: 4,
            max_bin: 16,
            ..small(BoostingParams::leaf_wise())
        };
        let model = BoostedModel::fit(&params, TreeGrowth::LeafWise, &train, &rows(50, false)).unwrap();

        assert!(model.predict_proba(&[0.95, 0.0]) > 0.7);
        assert!(model.predict_proba(&[0.05, 0.0]) < 0.3);
    }

    #[test]
    fn test_early_stopping_truncates_on_diverging_validation() {
        let train = rows(200, false);
        let validation = rows(60, true);
        let params = BoostingParams {
            early_stopping_rounds: Some(3),
            ..small(BoostingParams::depth_wise())
        };
        let model = BoostedModel::fit(&params, TreeGrowth::DepthWise, &train, &validation).unwrap();

        let kept = model.best_iteration().unwrap();
        assert_eq!(model.tree_count(), kept);
        assert!(kept < 40);
    }

    #[test]
    fn test_same_seed_same_model() {
        let train = rows(120, false);
        let params = small(BoostingParams::depth_wise());
        let a = BoostedModel::fit(&params, TreeGrowth::DepthWise, &train, &[]).unwrap();
        let b = BoostedModel::fit(&params, TreeGrowth::DepthWise, &train, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_class_rejected() {
        let train: Vec<MatchRow> = rows(50, false).into_iter().filter(|r| r.label).collect();
        let result = BoostedModel::fit(&BoostingParams::depth_wise(), TreeGrowth::DepthWise, &train, &[]);
        assert_eq!(result, Err(FitError::SingleClass));
    }
}
