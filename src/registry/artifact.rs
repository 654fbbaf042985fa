//! Model artifacts and serving-time prediction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::ml::{AlgorithmFamily, CalibrationModel, EnsembleCombiner, EnsembleSpec, ModelPayload, TrainedModel};
use crate::types::{EvaluationMetrics, FeatureSchema, Market, MatchRow, ModelVersion, TrainingWindow};

/// Rows per segment of the training cycle that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

/// Everything one training cycle produced. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub market: Market,
    pub version: ModelVersion,
    /// Serving version at registration time, `None` for a market's first artifact
    pub supersedes: Option<ModelVersion>,
    pub schema: FeatureSchema,
    /// One payload per family that trained
    pub models: Vec<ModelPayload>,
    pub ensemble: EnsembleSpec,
    pub calibration: CalibrationModel,
    /// Calibrated ensemble on the validation segment
    pub validation_metrics: EvaluationMetrics,
    /// Calibrated ensemble on the held-out test segment
    pub test_metrics: EvaluationMetrics,
    pub family_metrics: BTreeMap<AlgorithmFamily, EvaluationMetrics>,
    /// Normalized importance by feature column
    pub feature_importance: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub training_window: TrainingWindow,
    pub samples: SampleCounts,
}

impl ModelArtifact {
    pub fn families(&self) -> Vec<AlgorithmFamily> {
        self.models.iter().map(|p| p.family).collect()
    }

    /// Split into the metadata record and the opaque payloads
    pub fn into_parts(self) -> (ArtifactMetadata, Vec<ModelPayload>) {
        let payloads = self
            .models
            .iter()
            .map(|p| PayloadDescriptor {
                family: p.family,
                schema: p.schema.clone(),
                checksum: p.checksum.clone(),
            })
            .collect();

        let metadata = ArtifactMetadata {
            id: self.id,
            market: self.market,
            version: self.version,
            supersedes: self.supersedes,
            schema: self.schema,
            payloads,
            ensemble: self.ensemble,
            calibration: self.calibration,
            validation_metrics: self.validation_metrics,
            test_metrics: self.test_metrics,
            family_metrics: self.family_metrics,
            feature_importance: self.feature_importance,
            created_at: self.created_at,
            training_window: self.training_window,
            samples: self.samples,
        };
        (metadata, self.models)
    }

    /// Reassemble from stored parts, verifying each payload against its descriptor
    pub fn from_parts(metadata: ArtifactMetadata, mut models: Vec<ModelPayload>) -> Result<Self> {
        if models.len() != metadata.payloads.len() {
            return Err(PipelineError::CorruptArtifact(format!(
                "{} {}: metadata lists {} payloads, found {}",
                metadata.market,
                metadata.version,
                metadata.payloads.len(),
                models.len()
            )));
        }

        let mut ordered = Vec::with_capacity(models.len());
        for descriptor in &metadata.payloads {
            let pos = models
                .iter()
                .position(|p| p.family == descriptor.family)
                .ok_or_else(|| {
                    PipelineError::CorruptArtifact(format!(
                        "{} {}: missing {} payload",
                        metadata.market, metadata.version, descriptor.family
                    ))
                })?;
            let payload = models.swap_remove(pos);
            payload.verify()?;
            if payload.checksum != descriptor.checksum || payload.schema != descriptor.schema {
                return Err(PipelineError::CorruptArtifact(format!(
                    "{} {}: {} payload does not match its metadata",
                    metadata.market, metadata.version, descriptor.family
                )));
            }
            ordered.push(payload);
        }

        Ok(Self {
            id: metadata.id,
            market: metadata.market,
            version: metadata.version,
            supersedes: metadata.supersedes,
            schema: metadata.schema,
            models: ordered,
            ensemble: metadata.ensemble,
            calibration: metadata.calibration,
            validation_metrics: metadata.validation_metrics,
            test_metrics: metadata.test_metrics,
            family_metrics: metadata.family_metrics,
            feature_importance: metadata.feature_importance,
            created_at: metadata.created_at,
            training_window: metadata.training_window,
            samples: metadata.samples,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub family: AlgorithmFamily,
    pub schema: String,
    pub checksum: String,
}

/// Artifact without payload bytes, as persisted alongside them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: Uuid,
    pub market: Market,
    pub version: ModelVersion,
    pub supersedes: Option<ModelVersion>,
    pub schema: FeatureSchema,
    pub payloads: Vec<PayloadDescriptor>,
    pub ensemble: EnsembleSpec,
    pub calibration: CalibrationModel,
    pub validation_metrics: EvaluationMetrics,
    pub test_metrics: EvaluationMetrics,
    pub family_metrics: BTreeMap<AlgorithmFamily, EvaluationMetrics>,
    pub feature_importance: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub training_window: TrainingWindow,
    pub samples: SampleCounts,
}

/// Calibrated probability with the per-family inputs behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub market: Market,
    pub version: ModelVersion,
    pub probability: f64,
    pub raw_probability: f64,
    pub per_family: BTreeMap<AlgorithmFamily, f64>,
    /// 1 - coefficient of variation across families
    pub agreement: f64,
}

/// Decoded artifact ready to score feature vectors
#[derive(Debug, Clone)]
pub struct ServingModel {
    market: Market,
    version: ModelVersion,
    schema: FeatureSchema,
    models: BTreeMap<AlgorithmFamily, TrainedModel>,
    combiner: EnsembleCombiner,
    calibration: CalibrationModel,
}

impl ServingModel {
    pub fn from_artifact(artifact: &ModelArtifact) -> Result<Self> {
        let models = artifact
            .models
            .iter()
            .map(|payload| {
                TrainedModel::from_payload(payload, &artifact.schema).map(|m| (payload.family, m))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let combiner = EnsembleCombiner::new(artifact.ensemble.clone());
        // Fail at load time rather than on the first prediction
        combiner.spec().normalized(models.keys().copied())?;

        Ok(Self {
            market: artifact.market,
            version: artifact.version,
            schema: artifact.schema.clone(),
            models,
            combiner,
            calibration: artifact.calibration.clone(),
        })
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn version(&self) -> ModelVersion {
        self.version
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Score one feature vector laid out in `schema` order. The schema must be
    /// exactly the one the artifact was trained against.
    pub fn predict(&self, schema: &FeatureSchema, features: &[f64]) -> Result<Prediction> {
        self.schema.ensure_matches(schema)?;
        if features.len() != self.schema.len() {
            return Err(PipelineError::SchemaMismatch {
                expected: format!("{} ({} features)", self.schema.identifier(), self.schema.len()),
                actual: format!("{} features", features.len()),
            });
        }

        let per_family: BTreeMap<AlgorithmFamily, f64> = self
            .models
            .iter()
            .map(|(family, model)| (*family, model.predict_proba(features)))
            .collect();
        let raw_probability = self.combiner.combine_row(&per_family)?;
        let probabilities: Vec<f64> = per_family.values().copied().collect();

        Ok(Prediction {
            market: self.market,
            version: self.version,
            probability: self.calibration.apply_one(raw_probability),
            raw_probability,
            per_family,
            agreement: EnsembleCombiner::agreement(&probabilities),
        })
    }

    /// Calibrated probabilities for rows already validated against the schema
    pub fn predict_rows(&self, rows: &[MatchRow]) -> Result<Vec<f64>> {
        rows.iter()
            .map(|row| self.predict(&self.schema, &row.features).map(|p| p.probability))
            .collect()
    }
}
