//! Fitted models and their serialized payloads

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::boosting::BoostedModel;
use super::family::AlgorithmFamily;
use super::forest::ForestModel;
use super::logistic::LogisticModel;
use crate::error::{PipelineError, Result};
use crate::types::{FeatureSchema, MatchRow};

/// A fitted binary classifier from one algorithm family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum TrainedModel {
    Logistic(LogisticModel),
    GradientBoostedTreesA(BoostedModel),
    GradientBoostedTreesB(BoostedModel),
    RandomForest(ForestModel),
}

impl TrainedModel {
    pub fn family(&self) -> AlgorithmFamily {
        match self {
            TrainedModel::Logistic(_) => AlgorithmFamily::Logistic,
            TrainedModel::GradientBoostedTreesA(_) => AlgorithmFamily::GradientBoostedTreesA,
            TrainedModel::GradientBoostedTreesB(_) => AlgorithmFamily::GradientBoostedTreesB,
            TrainedModel::RandomForest(_) => AlgorithmFamily::RandomForest,
        }
    }

    /// Positive-class probability for one feature vector in schema order
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        match self {
            TrainedModel::Logistic(m) => m.predict_proba(features),
            TrainedModel::GradientBoostedTreesA(m) | TrainedModel::GradientBoostedTreesB(m) => {
                m.predict_proba(features)
            }
            TrainedModel::RandomForest(m) => m.predict_proba(features),
        }
    }

    pub fn predict_rows(&self, rows: &[MatchRow]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_proba(&r.features)).collect()
    }

    /// Importance per feature, normalized to sum to 1 (all zeros if nothing was learned).
    /// Logistic uses absolute standardized coefficients; trees use total split gain.
    pub fn feature_importance(&self) -> Vec<f64> {
        let raw: Vec<f64> = match self {
            TrainedModel::Logistic(m) => m.coefficients().iter().map(|w| w.abs()).collect(),
            TrainedModel::GradientBoostedTreesA(m) | TrainedModel::GradientBoostedTreesB(m) => {
                m.importance().to_vec()
            }
            TrainedModel::RandomForest(m) => m.importance().to_vec(),
        };

        let total: f64 = raw.iter().sum();
        if total > 0.0 && total.is_finite() {
            raw.iter().map(|v| v / total).collect()
        } else {
            vec![0.0; raw.len()]
        }
    }

    /// Serialize into a checksummed payload bound to `schema`
    pub fn to_payload(&self, schema: &FeatureSchema) -> Result<ModelPayload> {
        let bytes = serde_json::to_vec(self)?;
        Ok(ModelPayload {
            family: self.family(),
            schema: schema.identifier(),
            checksum: checksum(&bytes),
            bytes,
        })
    }

    pub fn from_payload(payload: &ModelPayload, schema: &FeatureSchema) -> Result<Self> {
        payload.verify()?;
        if payload.schema != schema.identifier() {
            return Err(PipelineError::SchemaMismatch {
                expected: schema.identifier(),
                actual: payload.schema.clone(),
            });
        }

        let model: TrainedModel = serde_json::from_slice(&payload.bytes)
            .map_err(|e| PipelineError::CorruptArtifact(format!("{} payload: {}", payload.family, e)))?;
        if model.family() != payload.family {
            return Err(PipelineError::CorruptArtifact(format!(
                "payload labeled {} contains a {} model",
                payload.family,
                model.family()
            )));
        }
        Ok(model)
    }
}

/// Opaque serialized model, tagged with its family and feature schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPayload {
    pub family: AlgorithmFamily,
    /// Feature schema identifier the model was fit against
    pub schema: String,
    /// Hex sha256 of `bytes`
    pub checksum: String,
    pub bytes: Vec<u8>,
}

impl ModelPayload {
    pub fn verify(&self) -> Result<()> {
        let actual = checksum(&self.bytes);
        if actual != self.checksum {
            return Err(PipelineError::CorruptArtifact(format!(
                "{} payload checksum mismatch: recorded {}, computed {}",
                self.family, self.checksum, actual
            )));
        }
        Ok(())
    }
}

pub(crate) fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::logistic::LogisticParams;
    use crate::types::Market;
    use chrono::Utc;

    fn logistic() -> TrainedModel {
        let rows: Vec<MatchRow> = (0..40)
            .map(|i| MatchRow {
                match_id: format!("m{}", i),
                timestamp: Utc::now(),
                features: vec![i as f64, (i % 3) as f64],
                label: (i * 7) % 40 < i,
                odds: 2.0,
            })
            .collect();
        TrainedModel::Logistic(LogisticModel::fit(&LogisticParams::default(), &rows).unwrap())
    }

    #[test]
    fn test_payload_restores_identical_model() {
        let schema = Market::Goals.default_schema();
        let model = logistic();
        let payload = model.to_payload(&schema).unwrap();

        assert_eq!(payload.family, AlgorithmFamily::Logistic);
        assert_eq!(payload.schema, "goals@v1");
        assert_eq!(TrainedModel::from_payload(&payload, &schema).unwrap(), model);
    }

    #[test]
    fn test_tampered_payload_is_corrupt() {
        let schema = Market::Goals.default_schema();
        let mut payload = logistic().to_payload(&schema).unwrap();
        payload.bytes.push(b' ');

        assert!(matches!(
            TrainedModel::from_payload(&payload, &schema),
            Err(PipelineError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_payload_bound_to_schema() {
        let payload = logistic().to_payload(&Market::Goals.default_schema()).unwrap();
        assert!(matches!(
            TrainedModel::from_payload(&payload, &Market::Cards.default_schema()),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_importance_normalized() {
        let importance = logistic().feature_importance();
        assert_eq!(importance.len(), 2);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
