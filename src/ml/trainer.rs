//! Multi-family model training
//!
//! Fits every requested family on the same training segment. Families are
//! independent, so they run on scoped threads when `parallel` is set. A family
//! that fails is logged and dropped; the run only fails if none succeed.

use std::collections::BTreeMap;

use super::family::{AlgorithmFamily, Hyperparameters};
use super::model::TrainedModel;
use crate::config::TrainerConfig;
use crate::error::{FitError, PipelineError, Result};
use crate::types::MatchRow;

/// Models that fitted plus the reason each failed family was dropped
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub models: BTreeMap<AlgorithmFamily, TrainedModel>,
    pub failures: BTreeMap<AlgorithmFamily, FitError>,
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    requests: Vec<Hyperparameters>,
    parallel: bool,
}

impl ModelTrainer {
    pub fn new(requests: Vec<Hyperparameters>, parallel: bool) -> Self {
        Self { requests, parallel }
    }

    pub fn from_config(config: &TrainerConfig) -> Self {
        Self::new(config.requests(), config.parallel)
    }

    pub fn families(&self) -> Vec<AlgorithmFamily> {
        self.requests.iter().map(Hyperparameters::family).collect()
    }

    /// Fit each requested family on `train`; `validation` is only used for early stopping
    pub fn train(&self, train: &[MatchRow], validation: &[MatchRow]) -> Result<TrainingOutput> {
        let results: Vec<(AlgorithmFamily, std::result::Result<TrainedModel, FitError>)> = if self.parallel
            && self.requests.len() > 1
        {
            std::thread::scope(|scope| {
                let handles: Vec<_> = self
                    .requests
                    .iter()
                    .map(|request| (request.family(), scope.spawn(move || request.fit(train, validation))))
                    .collect();

                handles
                    .into_iter()
                    .map(|(family, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(FitError::NumericalInstability(format!("{} fit panicked", family)))
                        });
                        (family, result)
                    })
                    .collect()
            })
        } else {
            self.requests
                .iter()
                .map(|request| (request.family(), request.fit(train, validation)))
                .collect()
        };

        let mut output = TrainingOutput {
            models: BTreeMap::new(),
            failures: BTreeMap::new(),
        };

        for (family, result) in results {
            match result {
                Ok(model) => {
                    tracing::info!(%family, rows = train.len(), "Trained model");
                    output.models.insert(family, model);
                }
                Err(e) => {
                    tracing::warn!(%family, error = %e, "Model family failed to fit, dropping it");
                    output.failures.insert(family, e);
                }
            }
        }

        if output.models.is_empty() {
            return Err(PipelineError::NoModelsTrained);
        }
        Ok(output)
    }
}
