//! Algorithm families
//!
//! The set of fitting routines is closed: adding a family means adding a
//! variant here, its hyperparameters, and its model type in [`TrainedModel`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::boosting::{BoostedModel, BoostingParams, TreeGrowth};
use super::forest::{ForestModel, ForestParams};
use super::logistic::{LogisticModel, LogisticParams};
use super::model::TrainedModel;
use crate::error::FitError;
use crate::types::MatchRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmFamily {
    /// L2-regularized logistic regression
    Logistic,
    /// Depth-wise gradient boosted trees with exact split search
    #[serde(alias = "xgboost")]
    GradientBoostedTreesA,
    /// Leaf-wise gradient boosted trees over histogram bins
    #[serde(alias = "lightgbm")]
    GradientBoostedTreesB,
    /// Bagged CART trees
    RandomForest,
}

impl AlgorithmFamily {
    pub const ALL: [AlgorithmFamily; 4] = [
        AlgorithmFamily::Logistic,
        AlgorithmFamily::GradientBoostedTreesA,
        AlgorithmFamily::GradientBoostedTreesB,
        AlgorithmFamily::RandomForest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmFamily::Logistic => "logistic",
            AlgorithmFamily::GradientBoostedTreesA => "gradient_boosted_trees_a",
            AlgorithmFamily::GradientBoostedTreesB => "gradient_boosted_trees_b",
            AlgorithmFamily::RandomForest => "random_forest",
        }
    }

    /// Whether fitting consults the validation segment to stop early
    pub fn supports_early_stopping(&self) -> bool {
        matches!(
            self,
            AlgorithmFamily::GradientBoostedTreesA | AlgorithmFamily::GradientBoostedTreesB
        )
    }

    pub fn is_tree_based(&self) -> bool {
        !matches!(self, AlgorithmFamily::Logistic)
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One family's hyperparameter set; the variant selects the fitting routine
#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameters {
    Logistic(LogisticParams),
    GradientBoostedTreesA(BoostingParams),
    GradientBoostedTreesB(BoostingParams),
    RandomForest(ForestParams),
}

impl Hyperparameters {
    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Hyperparameters::Logistic(_) => AlgorithmFamily::Logistic,
            Hyperparameters::GradientBoostedTreesA(_) => AlgorithmFamily::GradientBoostedTreesA,
            Hyperparameters::GradientBoostedTreesB(_) => AlgorithmFamily::GradientBoostedTreesB,
            Hyperparameters::RandomForest(_) => AlgorithmFamily::RandomForest,
        }
    }

    /// Fit on `train`; `validation` is only read by families that stop early
    pub fn fit(&self, train: &[MatchRow], validation: &[MatchRow]) -> Result<TrainedModel, FitError> {
        match self {
            Hyperparameters::Logistic(params) => {
                LogisticModel::fit(params, train).map(TrainedModel::Logistic)
            }
            Hyperparameters::GradientBoostedTreesA(params) => {
                BoostedModel::fit(params, TreeGrowth::DepthWise, train, validation)
                    .map(TrainedModel::GradientBoostedTreesA)
            }
            Hyperparameters::GradientBoostedTreesB(params) => {
                BoostedModel::fit(params, TreeGrowth::LeafWise, train, validation)
                    .map(TrainedModel::GradientBoostedTreesB)
            }
            Hyperparameters::RandomForest(params) => {
                ForestModel::fit(params, train).map(TrainedModel::RandomForest)
            }
        }
    }
}

/// Shared input checks: enough rows and both classes present
pub(crate) fn check_training_rows(rows: &[MatchRow], required: usize) -> Result<(), FitError> {
    if rows.len() < required {
        return Err(FitError::InsufficientData {
            required,
            actual: rows.len(),
        });
    }
    let positives = rows.iter().filter(|r| r.label).count();
    if positives == 0 || positives == rows.len() {
        return Err(FitError::SingleClass);
    }
    Ok(())
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_aliases() {
        let family: AlgorithmFamily = serde_json::from_str("\"xgboost\"").unwrap();
        assert_eq!(family, AlgorithmFamily::GradientBoostedTreesA);
        let family: AlgorithmFamily = serde_json::from_str("\"lightgbm\"").unwrap();
        assert_eq!(family, AlgorithmFamily::GradientBoostedTreesB);
        assert_eq!(
            serde_json::to_string(&AlgorithmFamily::RandomForest).unwrap(),
            "\"random_forest\""
        );
    }

    #[test]
    fn test_early_stopping_support() {
        assert!(!AlgorithmFamily::Logistic.supports_early_stopping());
        assert!(AlgorithmFamily::GradientBoostedTreesB.supports_early_stopping());
        assert!(!AlgorithmFamily::RandomForest.supports_early_stopping());
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!((sigmoid(logit(0.3)) - 0.3).abs() < 1e-9);
    }
}
