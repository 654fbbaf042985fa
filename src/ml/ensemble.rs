//! Weighted ensemble combination
//!
//! Weights are declared per family and renormalized over the families that
//! actually trained, so a family that failed to fit simply drops out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::family::AlgorithmFamily;
use crate::error::{PipelineError, Result};

/// Declared (unnormalized) weight per algorithm family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnsembleSpec")]
pub struct EnsembleSpec {
    weights: BTreeMap<AlgorithmFamily, f64>,
}

/// Unchecked wire form; deserialization goes through [`EnsembleSpec::new`]
#[derive(Deserialize)]
struct RawEnsembleSpec {
    weights: BTreeMap<AlgorithmFamily, f64>,
}

impl TryFrom<RawEnsembleSpec> for EnsembleSpec {
    type Error = PipelineError;

    fn try_from(raw: RawEnsembleSpec) -> Result<Self> {
        Self::new(raw.weights)
    }
}

impl EnsembleSpec {
    /// Weights must be finite and non-negative, with at least one positive
    pub fn new(weights: BTreeMap<AlgorithmFamily, f64>) -> Result<Self> {
        for (family, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "ensemble weight for {} must be finite and non-negative, got {}",
                    family, weight
                )));
            }
        }
        if !weights.values().any(|w| *w > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "ensemble needs at least one positive weight".to_string(),
            ));
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &BTreeMap<AlgorithmFamily, f64> {
        &self.weights
    }

    /// Weights restricted to `present` and rescaled to sum to 1
    pub fn normalized<I>(&self, present: I) -> Result<BTreeMap<AlgorithmFamily, f64>>
    where
        I: IntoIterator<Item = AlgorithmFamily>,
    {
        let selected: BTreeMap<AlgorithmFamily, f64> = present
            .into_iter()
            .filter_map(|family| self.weights.get(&family).map(|w| (family, *w)))
            .filter(|(_, w)| *w > 0.0)
            .collect();

        let total: f64 = selected.values().sum();
        if selected.is_empty() || total <= 0.0 {
            return Err(PipelineError::EmptyEnsemble);
        }

        Ok(selected.into_iter().map(|(f, w)| (f, w / total)).collect())
    }
}

/// Combines per-family probabilities into one weighted average
#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    spec: EnsembleSpec,
}

impl EnsembleCombiner {
    pub fn new(spec: EnsembleSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &EnsembleSpec {
        &self.spec
    }

    /// Normalized weights over `present`, warning about declared families that are absent
    pub fn weights_for<I>(&self, present: I) -> Result<BTreeMap<AlgorithmFamily, f64>>
    where
        I: IntoIterator<Item = AlgorithmFamily>,
    {
        let present: Vec<AlgorithmFamily> = present.into_iter().collect();
        for family in self.spec.weights.keys() {
            if !present.contains(family) {
                tracing::warn!(%family, "Ensemble family missing from trained models, renormalizing");
            }
        }
        self.spec.normalized(present)
    }

    /// Weighted average per row. Every family's vector must have the same length;
    /// families without a positive weight are ignored.
    pub fn combine(&self, predictions: &BTreeMap<AlgorithmFamily, Vec<f64>>) -> Result<Vec<f64>> {
        let weights = self.weights_for(predictions.keys().copied())?;

        let expected = predictions
            .values()
            .map(Vec::len)
            .next()
            .unwrap_or(0);
        for probs in predictions.values() {
            if probs.len() != expected {
                return Err(PipelineError::LengthMismatch {
                    expected,
                    actual: probs.len(),
                });
            }
        }

        let mut combined = vec![0.0; expected];
        for (family, weight) in &weights {
            if let Some(probs) = predictions.get(family) {
                for (out, p) in combined.iter_mut().zip(probs) {
                    *out += weight * p;
                }
            }
        }

        Ok(combined.into_iter().map(|p| p.clamp(0.0, 1.0)).collect())
    }

    /// Weighted average for a single row
    pub fn combine_row(&self, probabilities: &BTreeMap<AlgorithmFamily, f64>) -> Result<f64> {
        let weights = self.spec.normalized(probabilities.keys().copied())?;
        let p: f64 = weights
            .iter()
            .filter_map(|(family, w)| probabilities.get(family).map(|p| w * p))
            .sum();
        Ok(p.clamp(0.0, 1.0))
    }

    /// How closely the members agree: `1 - std/mean`, floored at 0.
    /// A single member (or a zero mean) counts as full agreement.
    pub fn agreement(probabilities: &[f64]) -> f64 {
        if probabilities.len() < 2 {
            return 1.0;
        }
        let n = probabilities.len() as f64;
        let mean = probabilities.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return 1.0;
        }
        let variance = probabilities.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        (1.0 - variance.sqrt() / mean).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spec() -> EnsembleSpec {
        EnsembleSpec::new(BTreeMap::from([
            (AlgorithmFamily::Logistic, 0.2),
            (AlgorithmFamily::GradientBoostedTreesA, 0.5),
            (AlgorithmFamily::GradientBoostedTreesB, 0.3),
        ]))
        .unwrap()
    }

    #[test]
    fn test_weighted_average() {
        let combiner = EnsembleCombiner::new(spec());
        let predictions = BTreeMap::from([
            (AlgorithmFamily::Logistic, vec![0.6]),
            (AlgorithmFamily::GradientBoostedTreesA, vec![0.7]),
            (AlgorithmFamily::GradientBoostedTreesB, vec![0.5]),
        ]);

        let combined = combiner.combine(&predictions).unwrap();
        assert!((combined[0] - 0.62).abs() < 1e-12);
    }

    #[test]
    fn test_missing_family_renormalizes() {
        let combiner = EnsembleCombiner::new(spec());
        let predictions = BTreeMap::from([
            (AlgorithmFamily::Logistic, vec![0.6, 0.2]),
            (AlgorithmFamily::GradientBoostedTreesA, vec![0.7, 0.4]),
        ]);

        let combined = combiner.combine(&predictions).unwrap();
        assert!((combined[0] - (0.2 / 0.7 * 0.6 + 0.5 / 0.7 * 0.7)).abs() < 1e-12);

        let weights = combiner
            .weights_for([AlgorithmFamily::Logistic, AlgorithmFamily::GradientBoostedTreesA])
            .unwrap();
        assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_overlap_is_empty_ensemble() {
        let combiner = EnsembleCombiner::new(spec());
        let predictions = BTreeMap::from([(AlgorithmFamily::RandomForest, vec![0.5])]);
        assert!(matches!(combiner.combine(&predictions), Err(PipelineError::EmptyEnsemble)));
    }

    #[test]
    fn test_length_mismatch() {
        let combiner = EnsembleCombiner::new(spec());
        let predictions = BTreeMap::from([
            (AlgorithmFamily::Logistic, vec![0.6, 0.1]),
            (AlgorithmFamily::GradientBoostedTreesA, vec![0.7]),
        ]);
        assert!(matches!(
            combiner.combine(&predictions),
            Err(PipelineError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let result = EnsembleSpec::new(BTreeMap::from([(AlgorithmFamily::Logistic, -1.0)]));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_validates_weights() {
        let spec: EnsembleSpec =
            serde_json::from_str(r#"{"weights":{"logistic":0.2,"gradient_boosted_trees_a":0.8}}"#).unwrap();
        assert_eq!(spec.weights().len(), 2);

        assert!(serde_json::from_str::<EnsembleSpec>(r#"{"weights":{"logistic":-0.5}}"#).is_err());
        assert!(serde_json::from_str::<EnsembleSpec>(r#"{"weights":{"logistic":0.0,"random_forest":0.0}}"#).is_err());
        assert!(serde_json::from_str::<EnsembleSpec>(r#"{"weights":{}}"#).is_err());
    }

    #[test]
    fn test_combined_probability_within_member_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let weights: BTreeMap<AlgorithmFamily, f64> = AlgorithmFamily::ALL
                .iter()
                .map(|f| (*f, rng.random_range(0.01..5.0)))
                .collect();
            let combiner = EnsembleCombiner::new(EnsembleSpec::new(weights).unwrap());

            // A random non-empty subset of families trained
            let present: Vec<AlgorithmFamily> = AlgorithmFamily::ALL
                .iter()
                .copied()
                .filter(|_| rng.random_bool(0.6))
                .collect();
            if present.is_empty() {
                continue;
            }

            let rows = 16;
            let predictions: BTreeMap<AlgorithmFamily, Vec<f64>> = present
                .iter()
                .map(|f| (*f, (0..rows).map(|_| rng.random::<f64>()).collect()))
                .collect();
            let combined = combiner.combine(&predictions).unwrap();

            for (row, p) in combined.iter().enumerate() {
                let members: Vec<f64> = predictions.values().map(|probs| probs[row]).collect();
                let lo = members.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = members.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                assert!(*p >= lo - 1e-12 && *p <= hi + 1e-12, "{} outside [{}, {}]", p, lo, hi);

                let single: BTreeMap<AlgorithmFamily, f64> =
                    predictions.iter().map(|(f, probs)| (*f, probs[row])).collect();
                assert!((combiner.combine_row(&single).unwrap() - p).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_agreement_score() {
        assert_eq!(EnsembleCombiner::agreement(&[0.6, 0.6, 0.6]), 1.0);
        let spread = EnsembleCombiner::agreement(&[0.2, 0.8]);
        assert!((spread - 0.4).abs() < 1e-12);
        assert_eq!(EnsembleCombiner::agreement(&[0.0, 1.0, 0.0, 0.0]), 0.0);
    }
}
