//! Football Market Probability Models
//!
//! Trains, calibrates, versions and validates binary probability models for
//! football betting markets (over/under goals, both teams to score, cards,
//! corners).
//!
//! ## Architecture
//!
//! ```text
//! Dataset → Splitter → Trainer (per family) → Ensemble → Calibrator → Metrics
//!                                                                       ↓
//!                         Registry (versions, serving pointer) ← Retrain policy
//!
//! Walk-forward backtester: repeats the cycle over advancing windows + staking
//! ```

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod types;

pub use config::PipelineConfig;
pub use error::{FitError, PipelineError, Result};
pub use pipeline::{RetrainOutcome, TrainingPipeline};
pub use registry::ModelRegistry;
pub use types::{Dataset, EvaluationMetrics, FeatureSchema, Market, MatchRow, ModelVersion};

#[cfg(test)]
mod types_tests;
