//! Production training cycle
//!
//! split -> train every family -> weighted ensemble -> calibrate on
//! validation -> evaluate on test -> gate -> register + promote.
//!
//! The CPU-bound cycle runs on the blocking pool; registry writes are async.
//! Independent markets can be retrained concurrently.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::data::DatasetSplitter;
use crate::error::{FitError, PipelineError, Result};
use crate::ml::{
    AlgorithmFamily, CalibrationModel, Calibrator, EnsembleCombiner, EnsembleSpec, MetricsEvaluator,
    ModelTrainer, TrainedModel,
};
use crate::policy::{RetrainDecision, RetrainPolicyEvaluator};
use crate::registry::{ModelArtifact, ModelRegistry, SampleCounts};
use crate::types::{Dataset, EvaluationMetrics, FeatureSchema, Market, MatchRow, ModelVersion, TrainingWindow};

/// Fitted, calibrated ensemble that has not been tested or registered yet
#[derive(Debug, Clone)]
pub struct CandidateModel {
    pub market: Market,
    pub schema: FeatureSchema,
    pub models: BTreeMap<AlgorithmFamily, TrainedModel>,
    pub failures: BTreeMap<AlgorithmFamily, FitError>,
    pub ensemble: EnsembleSpec,
    pub calibration: CalibrationModel,
    pub family_metrics: BTreeMap<AlgorithmFamily, EvaluationMetrics>,
    /// Ensemble on validation before calibration
    pub uncalibrated_metrics: EvaluationMetrics,
    /// Ensemble on validation after calibration
    pub validation_metrics: EvaluationMetrics,
    pub feature_importance: BTreeMap<String, f64>,
    pub training_window: TrainingWindow,
    pub train_rows: usize,
    pub validation_rows: usize,
}

impl CandidateModel {
    /// Ensemble probabilities before calibration
    pub fn raw_probabilities(&self, rows: &[MatchRow]) -> Result<Vec<f64>> {
        let per_family: BTreeMap<AlgorithmFamily, Vec<f64>> = self
            .models
            .iter()
            .map(|(family, model)| (*family, model.predict_rows(rows)))
            .collect();
        EnsembleCombiner::new(self.ensemble.clone()).combine(&per_family)
    }

    pub fn predict_rows(&self, rows: &[MatchRow]) -> Result<Vec<f64>> {
        Ok(Calibrator::apply(&self.calibration, &self.raw_probabilities(rows)?))
    }
}

/// Candidate plus its held-out test evaluation
#[derive(Debug, Clone)]
pub struct TrainedCycle {
    pub candidate: CandidateModel,
    pub test_metrics: EvaluationMetrics,
    pub test_rows: usize,
}

impl TrainedCycle {
    pub fn into_artifact(self, version: ModelVersion, supersedes: Option<ModelVersion>) -> Result<ModelArtifact> {
        let candidate = self.candidate;
        let models = candidate
            .models
            .values()
            .map(|model| model.to_payload(&candidate.schema))
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelArtifact {
            id: Uuid::new_v4(),
            market: candidate.market,
            version,
            supersedes,
            schema: candidate.schema,
            models,
            ensemble: candidate.ensemble,
            calibration: candidate.calibration,
            validation_metrics: candidate.validation_metrics,
            test_metrics: self.test_metrics,
            family_metrics: candidate.family_metrics,
            feature_importance: candidate.feature_importance,
            created_at: Utc::now(),
            training_window: candidate.training_window,
            samples: SampleCounts {
                train: candidate.train_rows,
                validation: candidate.validation_rows,
                test: self.test_rows,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainOutcome {
    pub market: Market,
    pub decision: RetrainDecision,
    /// Version registered and promoted, if any
    pub version: Option<ModelVersion>,
    pub supersedes: Option<ModelVersion>,
    pub validation_metrics: EvaluationMetrics,
    pub test_metrics: EvaluationMetrics,
    pub new_matches: usize,
}

#[derive(Clone)]
pub struct TrainingPipeline {
    config: Arc<PipelineConfig>,
}

impl TrainingPipeline {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Train, combine and calibrate on one train/validation pair
    pub fn fit_candidate(
        &self,
        market: Market,
        schema: &FeatureSchema,
        train: &[MatchRow],
        validation: &[MatchRow],
    ) -> Result<CandidateModel> {
        let (Some(start), Some(end)) = (
            train.iter().chain(validation).map(|r| r.timestamp).min(),
            train.iter().chain(validation).map(|r| r.timestamp).max(),
        ) else {
            return Err(PipelineError::InsufficientData(
                "no training rows for candidate".to_string(),
            ));
        };

        let output = ModelTrainer::from_config(&self.config.trainer).train(train, validation)?;

        let ensemble = self.config.ensemble.spec()?;
        let combiner = EnsembleCombiner::new(ensemble.clone());
        let weights = combiner.weights_for(output.models.keys().copied())?;

        let labels: Vec<bool> = validation.iter().map(|r| r.label).collect();
        let mut per_family = BTreeMap::new();
        let mut family_metrics = BTreeMap::new();
        for (family, model) in &output.models {
            let probabilities = model.predict_rows(validation);
            let metrics = MetricsEvaluator::evaluate(&labels, &probabilities)?;
            tracing::info!(
                %market,
                %family,
                weight = weights.get(family).copied().unwrap_or(0.0),
                %metrics,
                "Validation metrics"
            );
            family_metrics.insert(*family, metrics);
            per_family.insert(*family, probabilities);
        }

        let raw = combiner.combine(&per_family)?;
        let uncalibrated_metrics = MetricsEvaluator::evaluate(&labels, &raw)?;

        let calibration = Calibrator::fit(&raw, &labels, self.config.calibration.method)?;
        let calibrated = Calibrator::apply(&calibration, &raw);
        let validation_metrics = MetricsEvaluator::evaluate(&labels, &calibrated)?;
        tracing::info!(
            %market,
            method = %self.config.calibration.method,
            before = %uncalibrated_metrics,
            after = %validation_metrics,
            "Calibrated ensemble"
        );

        Ok(CandidateModel {
            market,
            schema: schema.clone(),
            feature_importance: importance_by_column(&output.models, schema),
            models: output.models,
            failures: output.failures,
            ensemble,
            calibration,
            family_metrics,
            uncalibrated_metrics,
            validation_metrics,
            training_window: TrainingWindow { start, end },
            train_rows: train.len(),
            validation_rows: validation.len(),
        })
    }

    /// Full cycle on `dataset`: chronological split, candidate fit, test evaluation
    pub fn run_cycle(&self, dataset: &Dataset) -> Result<TrainedCycle> {
        let split = DatasetSplitter::from_config(&self.config.split)?.split(dataset)?;
        tracing::info!(
            market = %dataset.market(),
            train = split.train.len(),
            validation = split.validation.len(),
            test = split.test.len(),
            "Starting training cycle"
        );

        let candidate = self.fit_candidate(dataset.market(), dataset.schema(), &split.train, &split.validation)?;

        let labels: Vec<bool> = split.test.iter().map(|r| r.label).collect();
        let test_metrics = MetricsEvaluator::evaluate(&labels, &candidate.predict_rows(&split.test)?)?;
        tracing::info!(market = %dataset.market(), metrics = %test_metrics, "Test metrics");

        Ok(TrainedCycle {
            candidate,
            test_metrics,
            test_rows: split.test.len(),
        })
    }

    /// Train a candidate on `dataset`, gate it against the serving model, and
    /// register + promote it on a promote verdict
    pub async fn retrain(&self, registry: &ModelRegistry, dataset: Dataset) -> Result<RetrainOutcome> {
        let market = dataset.market();
        let serving = match registry.get_serving(market).await {
            Ok(artifact) => Some(artifact),
            Err(PipelineError::NoServingModel(_)) => None,
            Err(e) => return Err(e),
        };
        let new_matches = serving
            .as_ref()
            .map_or(dataset.len(), |s| dataset.count_after(s.training_window.end));

        let pipeline = self.clone();
        let cycle = tokio::task::spawn_blocking(move || pipeline.run_cycle(&dataset))
            .await
            .map_err(|e| PipelineError::Internal(format!("training task failed: {}", e)))??;

        let policy = RetrainPolicyEvaluator::new(self.config.retrain.clone());
        let decision = policy.evaluate(
            &cycle.test_metrics,
            serving.as_ref().map(|s| &s.test_metrics),
            new_matches,
        );

        let supersedes = serving.as_ref().map(|s| s.version);
        let mut outcome = RetrainOutcome {
            market,
            decision,
            version: None,
            supersedes,
            validation_metrics: cycle.candidate.validation_metrics,
            test_metrics: cycle.test_metrics,
            new_matches,
        };
        if !decision.is_promote() {
            return Ok(outcome);
        }

        let artifact = registry
            .register_next(
                market,
                |latest| policy.next_version(latest),
                |version| cycle.into_artifact(version, supersedes),
            )
            .await?;
        let version = artifact.version;
        registry.promote(market, version).await?;

        outcome.version = Some(version);
        Ok(outcome)
    }

    /// Retrain several markets concurrently; a task that panics is logged and omitted
    pub async fn retrain_markets(
        &self,
        registry: Arc<ModelRegistry>,
        datasets: Vec<Dataset>,
    ) -> Vec<(Market, Result<RetrainOutcome>)> {
        let mut tasks = JoinSet::new();
        for dataset in datasets {
            let pipeline = self.clone();
            let registry = Arc::clone(&registry);
            let market = dataset.market();
            tasks.spawn(async move { (market, pipeline.retrain(&registry, dataset).await) });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Retrain task failed to complete"),
            }
        }
        results.sort_by_key(|(market, _)| *market);
        results
    }
}

/// Importance of the first tree-based family that trained, falling back to
/// logistic coefficients, keyed by column name
fn importance_by_column(
    models: &BTreeMap<AlgorithmFamily, TrainedModel>,
    schema: &FeatureSchema,
) -> BTreeMap<String, f64> {
    let source = AlgorithmFamily::ALL
        .iter()
        .filter(|f| f.is_tree_based())
        .chain(std::iter::once(&AlgorithmFamily::Logistic))
        .find_map(|f| models.get(f));

    match source {
        Some(model) => schema
            .columns
            .iter()
            .cloned()
            .zip(model.feature_importance())
            .collect(),
        None => BTreeMap::new(),
    }
}
