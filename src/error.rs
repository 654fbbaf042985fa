//! Error types for the training pipeline
//!
//! Two layers:
//! - [`PipelineError`]: everything that aborts an operation and is surfaced to the caller
//! - [`FitError`]: a single algorithm family failed to fit; the trainer logs it and
//!   drops that family instead of aborting the run

use crate::types::{Market, ModelVersion};
use thiserror::Error;

/// Errors surfaced by pipeline components
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid split ratios: train={train_ratio}, val={val_ratio} (each must be in (0,1) and sum below 1)")]
    InvalidRatio { train_ratio: f64, val_ratio: f64 },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Duplicate match identifier: {0}")]
    DuplicateMatch(String),

    #[error("Feature schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    #[error("No models trained: every requested algorithm family failed")]
    NoModelsTrained,

    #[error("Empty ensemble: no trained family has a weight in the ensemble spec")]
    EmptyEnsemble,

    #[error("Unknown calibration method: {0}")]
    UnknownCalibrationMethod(String),

    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Version {version} already registered for market {market}")]
    DuplicateVersion { market: Market, version: ModelVersion },

    #[error("Version {attempted} for market {market} does not exceed latest registered {latest}")]
    VersionRegression {
        market: Market,
        latest: ModelVersion,
        attempted: ModelVersion,
    },

    #[error("Artifact not found: market {market}, version {version}")]
    ArtifactNotFound { market: Market, version: ModelVersion },

    #[error("No serving model has been promoted for market {0}")]
    NoServingModel(Market),

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Unknown version bump kind: {0}")]
    UnknownBumpKind(String),

    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Failure of a single algorithm family. Never fatal on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Training labels contain a single class")]
    SingleClass,

    #[error("Insufficient training data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Failed to converge after {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
