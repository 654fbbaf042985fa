//! Promotion gate for retrained models
//!
//! A pure decision over fresh candidate metrics: enough new evidence, and
//! absolute quality under the configured ceilings. Rejection is a normal
//! outcome, never an error.

use serde::Serialize;
use std::fmt;

use crate::config::RetrainConfig;
use crate::error::Result;
use crate::types::{BumpKind, EvaluationMetrics, ModelVersion};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientNewMatches { required: usize, actual: usize },
    LogLossAboveThreshold { value: f64, threshold: f64 },
    BrierAboveThreshold { value: f64, threshold: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientNewMatches { required, actual } => {
                write!(f, "only {} new matches, need {}", actual, required)
            }
            RejectReason::LogLossAboveThreshold { value, threshold } => {
                write!(f, "log loss {:.4} above {:.4}", value, threshold)
            }
            RejectReason::BrierAboveThreshold { value, threshold } => {
                write!(f, "brier score {:.4} above {:.4}", value, threshold)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetrainDecision {
    Promote,
    Reject(RejectReason),
}

impl RetrainDecision {
    pub fn is_promote(&self) -> bool {
        matches!(self, RetrainDecision::Promote)
    }
}

impl fmt::Display for RetrainDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainDecision::Promote => f.write_str("promote"),
            RetrainDecision::Reject(reason) => write!(f, "reject ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrainPolicyEvaluator {
    config: RetrainConfig,
}

impl RetrainPolicyEvaluator {
    pub fn new(config: RetrainConfig) -> Self {
        Self { config }
    }

    /// Checks run in order: new-match count, log loss, Brier score.
    /// The incumbent's metrics are informational; the gate is absolute.
    pub fn evaluate(
        &self,
        candidate: &EvaluationMetrics,
        incumbent: Option<&EvaluationMetrics>,
        new_matches: usize,
    ) -> RetrainDecision {
        let threshold = &self.config.performance_threshold;

        let decision = if new_matches < self.config.min_new_matches {
            RetrainDecision::Reject(RejectReason::InsufficientNewMatches {
                required: self.config.min_new_matches,
                actual: new_matches,
            })
        } else if !(candidate.log_loss <= threshold.log_loss) {
            RetrainDecision::Reject(RejectReason::LogLossAboveThreshold {
                value: candidate.log_loss,
                threshold: threshold.log_loss,
            })
        } else if !(candidate.brier_score <= threshold.brier_score) {
            RetrainDecision::Reject(RejectReason::BrierAboveThreshold {
                value: candidate.brier_score,
                threshold: threshold.brier_score,
            })
        } else {
            RetrainDecision::Promote
        };

        match (&decision, incumbent) {
            (RetrainDecision::Promote, Some(current)) => tracing::info!(
                candidate = %candidate,
                incumbent = %current,
                new_matches,
                "Retrain gate passed"
            ),
            (RetrainDecision::Promote, None) => {
                tracing::info!(candidate = %candidate, new_matches, "Retrain gate passed")
            }
            (RetrainDecision::Reject(reason), _) => {
                tracing::warn!(%reason, candidate = %candidate, "Retrain gate rejected candidate")
            }
        }

        decision
    }

    pub fn bump_kind(&self) -> BumpKind {
        self.config.version_increment
    }

    /// Version a promoted candidate receives: the configured bump of the
    /// newest registered version, or the initial version for an empty history
    pub fn next_version(&self, latest: Option<ModelVersion>) -> Result<ModelVersion> {
        latest.map_or(Ok(ModelVersion::INITIAL), |v| v.bump(self.config.version_increment))
    }
}

/// String form of [`ModelVersion::bump`], e.g. `("v1.2.3", "minor") -> "v1.3.0"`
pub fn increment_version(version: &str, kind: &str) -> Result<String> {
    let version: ModelVersion = version.parse()?;
    let kind: BumpKind = kind.parse()?;
    Ok(version.bump(kind)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerformanceThreshold;
    use crate::error::PipelineError;

    fn metrics(log_loss: f64, brier_score: f64) -> EvaluationMetrics {
        EvaluationMetrics {
            log_loss,
            brier_score,
            accuracy: 0.6,
            auc_roc: 0.65,
        }
    }

    fn evaluator() -> RetrainPolicyEvaluator {
        RetrainPolicyEvaluator::new(RetrainConfig::default())
    }

    #[test]
    fn test_promotes_good_candidate() {
        let decision = evaluator().evaluate(&metrics(0.60, 0.21), None, 150);
        assert_eq!(decision, RetrainDecision::Promote);
        assert!(decision.is_promote());
    }

    #[test]
    fn test_rejects_log_loss_even_when_better_than_incumbent() {
        let incumbent = metrics(0.80, 0.30);
        let decision = evaluator().evaluate(&metrics(0.70, 0.22), Some(&incumbent), 500);
        assert!(matches!(
            decision,
            RetrainDecision::Reject(RejectReason::LogLossAboveThreshold { .. })
        ));
    }

    #[test]
    fn test_rejects_brier_above_threshold() {
        let decision = evaluator().evaluate(&metrics(0.60, 0.26), None, 500);
        assert!(matches!(
            decision,
            RetrainDecision::Reject(RejectReason::BrierAboveThreshold { .. })
        ));
    }

    #[test]
    fn test_rejects_insufficient_new_matches_regardless_of_quality() {
        let decision = evaluator().evaluate(&metrics(0.1, 0.01), None, 99);
        assert_eq!(
            decision,
            RetrainDecision::Reject(RejectReason::InsufficientNewMatches {
                required: 100,
                actual: 99
            })
        );
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let config = RetrainConfig {
            performance_threshold: PerformanceThreshold {
                log_loss: 0.6,
                brier_score: 0.2,
            },
            ..Default::default()
        };
        let decision = RetrainPolicyEvaluator::new(config).evaluate(&metrics(0.6, 0.2), None, 100);
        assert_eq!(decision, RetrainDecision::Promote);
    }

    #[test]
    fn test_non_finite_metrics_rejected() {
        let decision = evaluator().evaluate(&metrics(f64::NAN, 0.1), None, 500);
        assert!(!decision.is_promote());
    }

    #[test]
    fn test_increment_version() {
        assert_eq!(increment_version("v1.2.3", "minor").unwrap(), "v1.3.0");
        assert_eq!(increment_version("v1.2.3", "major").unwrap(), "v2.0.0");
        assert_eq!(increment_version("v1.2.3", "patch").unwrap(), "v1.2.4");
        assert!(matches!(
            increment_version("v1.2", "minor"),
            Err(PipelineError::InvalidVersion(_))
        ));
        assert!(matches!(
            increment_version("v1.2.3", "huge"),
            Err(PipelineError::UnknownBumpKind(_))
        ));
    }

    #[test]
    fn test_next_version() {
        let policy = evaluator();
        assert_eq!(policy.next_version(None).unwrap(), ModelVersion::INITIAL);
        assert_eq!(
            policy.next_version(Some(ModelVersion::new(1, 2, 3))).unwrap(),
            ModelVersion::new(1, 3, 0)
        );
    }
}
