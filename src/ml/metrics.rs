//! Evaluation metrics for probabilistic binary predictions

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::EvaluationMetrics;

/// Probabilities are clipped to `[eps, 1 - eps]` before taking logs
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Predictions at or above this are counted as positive for accuracy
pub const DECISION_THRESHOLD: f64 = 0.5;

pub const RELIABILITY_BINS: usize = 10;

/// One bin of a reliability diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    /// Mean predicted probability, or the bin midpoint when empty
    pub mean_predicted: f64,
    /// Observed positive rate; `None` when empty
    pub fraction_positive: Option<f64>,
}

pub struct MetricsEvaluator;

impl MetricsEvaluator {
    pub fn evaluate(labels: &[bool], probabilities: &[f64]) -> Result<EvaluationMetrics> {
        Self::evaluate_with_predictions(labels, probabilities, None)
    }

    /// Same as [`evaluate`](Self::evaluate), with accuracy computed from explicit
    /// binary predictions when given
    pub fn evaluate_with_predictions(
        labels: &[bool],
        probabilities: &[f64],
        predictions: Option<&[bool]>,
    ) -> Result<EvaluationMetrics> {
        check_lengths(labels, probabilities)?;
        if let Some(predicted) = predictions {
            if predicted.len() != labels.len() {
                return Err(PipelineError::LengthMismatch {
                    expected: labels.len(),
                    actual: predicted.len(),
                });
            }
        }

        let n = labels.len() as f64;
        let mut log_loss = 0.0;
        let mut brier = 0.0;
        let mut correct = 0usize;

        for (i, (label, p)) in labels.iter().zip(probabilities).enumerate() {
            let y = if *label { 1.0 } else { 0.0 };
            let clipped = p.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
            log_loss -= y * clipped.ln() + (1.0 - y) * (1.0 - clipped).ln();
            brier += (p - y).powi(2);

            let predicted = match predictions {
                Some(predicted) => predicted[i],
                None => *p >= DECISION_THRESHOLD,
            };
            if predicted == *label {
                correct += 1;
            }
        }

        Ok(EvaluationMetrics {
            log_loss: log_loss / n,
            brier_score: brier / n,
            accuracy: correct as f64 / n,
            auc_roc: auc_roc(labels, probabilities),
        })
    }

    /// Equal-width bins over [0, 1]; a probability of exactly 1 falls in the last bin
    pub fn reliability_curve(labels: &[bool], probabilities: &[f64], bins: usize) -> Result<Vec<ReliabilityBin>> {
        check_lengths(labels, probabilities)?;
        let bins = bins.max(1);
        let width = 1.0 / bins as f64;

        let mut sums = vec![(0usize, 0.0, 0usize); bins];
        for (label, p) in labels.iter().zip(probabilities) {
            let idx = ((p / width).floor().max(0.0) as usize).min(bins - 1);
            sums[idx].0 += 1;
            sums[idx].1 += p;
            if *label {
                sums[idx].2 += 1;
            }
        }

        Ok(sums
            .into_iter()
            .enumerate()
            .map(|(i, (count, sum_p, positives))| {
                let lower = i as f64 * width;
                let upper = lower + width;
                ReliabilityBin {
                    lower,
                    upper,
                    count,
                    mean_predicted: if count > 0 {
                        sum_p / count as f64
                    } else {
                        lower + width / 2.0
                    },
                    fraction_positive: (count > 0).then(|| positives as f64 / count as f64),
                }
            })
            .collect())
    }

    /// Count-weighted mean gap between predicted and observed rates
    pub fn expected_calibration_error(labels: &[bool], probabilities: &[f64]) -> Result<f64> {
        let curve = Self::reliability_curve(labels, probabilities, RELIABILITY_BINS)?;
        let n = labels.len() as f64;
        Ok(curve
            .iter()
            .filter_map(|bin| {
                bin.fraction_positive
                    .map(|observed| bin.count as f64 / n * (bin.mean_predicted - observed).abs())
            })
            .sum())
    }
}

fn check_lengths(labels: &[bool], probabilities: &[f64]) -> Result<()> {
    if labels.len() != probabilities.len() {
        return Err(PipelineError::LengthMismatch {
            expected: labels.len(),
            actual: probabilities.len(),
        });
    }
    if labels.is_empty() {
        return Err(PipelineError::InsufficientData(
            "cannot evaluate an empty prediction set".to_string(),
        ));
    }
    Ok(())
}

/// Mann-Whitney form of the ROC AUC with average ranks for ties.
/// Returns 0.0 when only one class is present.
fn auc_roc(labels: &[bool], probabilities: &[f64]) -> f64 {
    let positives = labels.iter().filter(|l| **l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        tracing::warn!(positives, negatives, "AUC undefined for a single class, reporting 0.0");
        return 0.0;
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block shares the average
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}
