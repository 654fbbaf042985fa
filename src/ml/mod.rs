//! Model fitting, combination, calibration and evaluation
//!
//! - Algorithm families: logistic regression, two gradient boosted tree
//!   variants, random forest
//! - Multi-family training with per-family failure isolation
//! - Weighted ensemble with renormalization over surviving families
//! - Isotonic and sigmoid calibration
//! - Log loss, Brier score, accuracy, ROC AUC and reliability curves

pub mod boosting;
pub mod calibration;
pub mod ensemble;
pub mod family;
pub mod forest;
pub mod logistic;
pub mod metrics;
pub mod model;
pub mod trainer;
pub mod tree;

#[cfg(test)]
mod tests;

pub use boosting::{BoostedModel, BoostingParams, TreeGrowth};
pub use calibration::{CalibrationMethod, CalibrationModel, Calibrator};
pub use ensemble::{EnsembleCombiner, EnsembleSpec};
pub use family::{AlgorithmFamily, Hyperparameters};
pub use forest::{ForestModel, ForestParams};
pub use logistic::{LogisticModel, LogisticParams};
pub use metrics::{MetricsEvaluator, ReliabilityBin, RELIABILITY_BINS};
pub use model::{ModelPayload, TrainedModel};
pub use trainer::{ModelTrainer, TrainingOutput};
