//! Pipeline configuration
//!
//! One immutable [`PipelineConfig`] is built per invocation and passed into
//! every component. Values come from an optional TOML file layered under
//! `PIPELINE__SECTION__KEY` environment overrides.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::DatasetSplitter;
use crate::error::{PipelineError, Result};
use crate::ml::{
    AlgorithmFamily, BoostingParams, CalibrationMethod, EnsembleSpec, ForestParams,
    Hyperparameters, LogisticParams,
};
use crate::types::BumpKind;

/// Top-level configuration surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub retrain: RetrainConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl PipelineConfig {
    /// Load from an optional file plus environment overrides, then validate
    pub fn load(path: &str) -> Result<Self> {
        let config: PipelineConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("PIPELINE").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        DatasetSplitter::new(self.split.train_ratio, self.split.val_ratio)?;

        if self.trainer.families.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "trainer.families must name at least one algorithm family".to_string(),
            ));
        }

        self.ensemble.spec()?;

        let threshold = &self.retrain.performance_threshold;
        if !(threshold.log_loss > 0.0 && threshold.brier_score > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "retrain.performance_threshold values must be positive".to_string(),
            ));
        }

        if self.backtest.initial_train_months == 0 || self.backtest.step_months == 0 {
            return Err(PipelineError::InvalidConfig(
                "backtest horizon and step must be at least one month".to_string(),
            ));
        }
        if self.backtest.min_test_matches == 0 {
            return Err(PipelineError::InvalidConfig(
                "backtest.min_test_matches must be positive".to_string(),
            ));
        }

        if self.staking.stake_cap < Decimal::ZERO || self.staking.stake_cap > Decimal::ONE {
            return Err(PipelineError::InvalidConfig(
                "staking.stake_cap must be within [0, 1]".to_string(),
            ));
        }
        if self.staking.kelly_fraction <= Decimal::ZERO || self.staking.kelly_fraction > Decimal::ONE {
            return Err(PipelineError::InvalidConfig(
                "staking.kelly_fraction must be within (0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Chronological train/validation/test ratios; the test share is the remainder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
    #[serde(default = "default_val_ratio")]
    pub val_ratio: f64,
}

fn default_train_ratio() -> f64 {
    0.70
}

fn default_val_ratio() -> f64 {
    0.15
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: default_train_ratio(),
            val_ratio: default_val_ratio(),
        }
    }
}

/// Which algorithm families to fit and with which hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_families")]
    pub families: Vec<AlgorithmFamily>,
    /// Fit families on separate threads
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub logistic: LogisticParams,
    #[serde(default = "BoostingParams::depth_wise")]
    pub boosted_a: BoostingParams,
    #[serde(default = "BoostingParams::leaf_wise")]
    pub boosted_b: BoostingParams,
    #[serde(default)]
    pub random_forest: ForestParams,
}

fn default_families() -> Vec<AlgorithmFamily> {
    vec![
        AlgorithmFamily::Logistic,
        AlgorithmFamily::GradientBoostedTreesA,
        AlgorithmFamily::GradientBoostedTreesB,
    ]
}

fn default_true() -> bool {
    true
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            families: default_families(),
            parallel: true,
            logistic: LogisticParams::default(),
            boosted_a: BoostingParams::depth_wise(),
            boosted_b: BoostingParams::leaf_wise(),
            random_forest: ForestParams::default(),
        }
    }
}

impl TrainerConfig {
    /// One hyperparameter set per configured family, duplicates removed
    pub fn requests(&self) -> Vec<Hyperparameters> {
        let mut seen = Vec::with_capacity(self.families.len());
        for family in &self.families {
            if !seen.contains(family) {
                seen.push(*family);
            }
        }

        seen.into_iter()
            .map(|family| match family {
                AlgorithmFamily::Logistic => Hyperparameters::Logistic(self.logistic.clone()),
                AlgorithmFamily::GradientBoostedTreesA => {
                    Hyperparameters::GradientBoostedTreesA(self.boosted_a.clone())
                }
                AlgorithmFamily::GradientBoostedTreesB => {
                    Hyperparameters::GradientBoostedTreesB(self.boosted_b.clone())
                }
                AlgorithmFamily::RandomForest => Hyperparameters::RandomForest(self.random_forest.clone()),
            })
            .collect()
    }
}

/// Ensemble weights per family (normalized at combination time)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<AlgorithmFamily, f64>,
}

fn default_weights() -> BTreeMap<AlgorithmFamily, f64> {
    BTreeMap::from([
        (AlgorithmFamily::Logistic, 0.2),
        (AlgorithmFamily::GradientBoostedTreesA, 0.5),
        (AlgorithmFamily::GradientBoostedTreesB, 0.3),
    ])
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
        }
    }
}

impl EnsembleConfig {
    pub fn spec(&self) -> Result<EnsembleSpec> {
        EnsembleSpec::new(self.weights.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_method")]
    pub method: CalibrationMethod,
}

fn default_calibration_method() -> CalibrationMethod {
    CalibrationMethod::Isotonic
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: default_calibration_method(),
        }
    }
}

/// Promotion gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainConfig {
    /// Minimum labeled matches since the serving model's training window ended
    #[serde(default = "default_min_new_matches")]
    pub min_new_matches: usize,
    #[serde(default)]
    pub performance_threshold: PerformanceThreshold,
    #[serde(default = "default_version_increment")]
    pub version_increment: BumpKind,
}

fn default_min_new_matches() -> usize {
    100
}

fn default_version_increment() -> BumpKind {
    BumpKind::Minor
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            min_new_matches: default_min_new_matches(),
            performance_threshold: PerformanceThreshold::default(),
            version_increment: default_version_increment(),
        }
    }
}

/// Absolute quality ceilings a candidate must stay under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceThreshold {
    #[serde(default = "default_max_log_loss")]
    pub log_loss: f64,
    #[serde(default = "default_max_brier")]
    pub brier_score: f64,
}

fn default_max_log_loss() -> f64 {
    0.65
}

fn default_max_brier() -> f64 {
    0.25
}

impl Default for PerformanceThreshold {
    fn default() -> Self {
        Self {
            log_loss: default_max_log_loss(),
            brier_score: default_max_brier(),
        }
    }
}

/// Walk-forward backtest horizons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_train_months")]
    pub initial_train_months: u32,
    #[serde(default = "default_step_months")]
    pub step_months: u32,
    #[serde(default = "default_min_test_matches")]
    pub min_test_matches: usize,
    /// Expanding training horizon instead of a rolling one
    #[serde(default)]
    pub anchored: bool,
}

fn default_initial_train_months() -> u32 {
    12
}

fn default_step_months() -> u32 {
    1
}

fn default_min_test_matches() -> usize {
    50
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_train_months: default_initial_train_months(),
            step_months: default_step_months(),
            min_test_matches: default_min_test_matches(),
            anchored: false,
        }
    }
}

/// Kelly staking simulation used by the backtester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Maximum stake per bet as a fraction of a unit bankroll
    #[serde(default = "default_stake_cap")]
    pub stake_cap: Decimal,
    /// Multiplier applied to the full Kelly fraction before capping
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: Decimal,
    /// Bets need an edge strictly above this
    #[serde(default)]
    pub min_edge: Decimal,
}

fn default_stake_cap() -> Decimal {
    dec!(0.05)
}

fn default_kelly_fraction() -> Decimal {
    Decimal::ONE
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            stake_cap: default_stake_cap(),
            kelly_fraction: default_kelly_fraction(),
            min_edge: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Sqlite,
}

/// Where the model registry persists artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory for the file backend, database file for sqlite
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_backend() -> StorageBackend {
    StorageBackend::File
}

fn default_storage_path() -> String {
    "models".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
        }
    }
}
