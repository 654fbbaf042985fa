//! Walk-forward backtest driver

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::staking::{StakingSimulator, StakingSummary};
use super::windows::{generate_windows, BacktestWindow};
use crate::config::PipelineConfig;
use crate::data::DatasetSplitter;
use crate::error::{PipelineError, Result};
use crate::ml::{AlgorithmFamily, MetricsEvaluator};
use crate::pipeline::TrainingPipeline;
use crate::policy::{RetrainDecision, RetrainPolicyEvaluator};
use crate::types::{Dataset, EvaluationMetrics, Market, MatchRow, ModelVersion};

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub window: BacktestWindow,
    pub train_rows: usize,
    pub test_rows: usize,
    pub families: Vec<AlgorithmFamily>,
    /// Calibrated ensemble on the window's test slice
    pub metrics: EvaluationMetrics,
    pub staking: StakingSummary,
    /// Gate verdict for this window's candidate against the simulated serving model
    pub decision: RetrainDecision,
    /// Simulated serving version after this window
    pub serving_version: Option<ModelVersion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedWindow {
    pub window: BacktestWindow,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub windows: usize,
    pub skipped: usize,
    /// Unweighted mean over evaluated windows
    pub mean_metrics: Option<EvaluationMetrics>,
    pub staking: StakingSummary,
    pub promotions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub market: Market,
    /// Evaluated windows in time order
    pub windows: Vec<WindowResult>,
    pub skipped: Vec<SkippedWindow>,
    pub summary: BacktestSummary,
}

struct SimulatedServing {
    version: ModelVersion,
    trained_through: DateTime<Utc>,
    metrics: EvaluationMetrics,
}

pub struct WalkForwardBacktester {
    config: Arc<PipelineConfig>,
}

impl WalkForwardBacktester {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    /// Run every window in time order. Windows are sequential: each one's
    /// promotion verdict moves the simulated serving pointer used by the next.
    pub fn run(&self, dataset: &Dataset) -> Result<BacktestReport> {
        self.config.validate()?;

        let market = dataset.market();
        let rows = dataset.sorted_rows();
        let backtest = &self.config.backtest;

        let windows = generate_windows(&rows, backtest);
        if windows.is_empty() {
            return Err(PipelineError::InsufficientData(format!(
                "no walk-forward window has {} test matches after a {}-month training horizon ({} rows)",
                backtest.min_test_matches,
                backtest.initial_train_months,
                rows.len()
            )));
        }
        tracing::info!(%market, windows = windows.len(), anchored = backtest.anchored, "Starting walk-forward backtest");

        let pipeline = TrainingPipeline::new(Arc::clone(&self.config));
        let policy = RetrainPolicyEvaluator::new(self.config.retrain.clone());
        let staking = StakingSimulator::new(self.config.staking.clone());
        let fit_fraction = DatasetSplitter::from_config(&self.config.split)?.fit_fraction();

        let mut results = Vec::with_capacity(windows.len());
        let mut skipped = Vec::new();
        let mut serving: Option<SimulatedServing> = None;

        for window in windows {
            let train: Vec<MatchRow> = rows
                .iter()
                .filter(|r| window.contains_train(r.timestamp))
                .cloned()
                .collect();
            let test: Vec<MatchRow> = rows
                .iter()
                .filter(|r| window.contains_test(r.timestamp))
                .cloned()
                .collect();

            if test.len() < backtest.min_test_matches {
                let reason = format!(
                    "test slice has {} rows, need {}",
                    test.len(),
                    backtest.min_test_matches
                );
                tracing::warn!(window = window.index, %reason, "Skipping backtest window");
                skipped.push(SkippedWindow { window, reason });
                continue;
            }

            let train_rows = train.len();
            let candidate = match DatasetSplitter::holdout(train, fit_fraction)
                .and_then(|(fit, validation)| pipeline.fit_candidate(market, dataset.schema(), &fit, &validation))
            {
                Ok(candidate) => candidate,
                Err(
                    e @ (PipelineError::InsufficientData(_)
                    | PipelineError::NoModelsTrained
                    | PipelineError::EmptyEnsemble),
                ) => {
                    tracing::warn!(window = window.index, error = %e, "Skipping backtest window");
                    skipped.push(SkippedWindow {
                        window,
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let probabilities = candidate.predict_rows(&test)?;
            let labels: Vec<bool> = test.iter().map(|r| r.label).collect();
            let metrics = MetricsEvaluator::evaluate(&labels, &probabilities)?;
            let (_, stakes) = staking.simulate(&test, &probabilities)?;

            let new_matches = match &serving {
                Some(current) => rows
                    .iter()
                    .filter(|r| r.timestamp > current.trained_through && r.timestamp <= window.train_end)
                    .count(),
                None => rows.iter().filter(|r| r.timestamp <= window.train_end).count(),
            };
            let decision = policy.evaluate(
                &candidate.validation_metrics,
                serving.as_ref().map(|s| &s.metrics),
                new_matches,
            );
            if decision.is_promote() {
                serving = Some(SimulatedServing {
                    version: policy.next_version(serving.as_ref().map(|s| s.version))?,
                    trained_through: candidate.training_window.end,
                    metrics: candidate.validation_metrics,
                });
            }

            tracing::info!(
                %market,
                window = window.index,
                test_rows = test.len(),
                metrics = %metrics,
                bets = stakes.bets,
                roi = ?stakes.roi,
                %decision,
                "Backtest window evaluated"
            );

            results.push(WindowResult {
                window,
                train_rows,
                test_rows: test.len(),
                families: candidate.models.keys().copied().collect(),
                metrics,
                staking: stakes,
                decision,
                serving_version: serving.as_ref().map(|s| s.version),
            });
        }

        let summary = summarize(&results, skipped.len());
        tracing::info!(
            %market,
            windows = summary.windows,
            skipped = summary.skipped,
            roi = ?summary.staking.roi,
            promotions = summary.promotions,
            "Backtest complete"
        );

        Ok(BacktestReport {
            market,
            windows: results,
            skipped,
            summary,
        })
    }
}

fn summarize(results: &[WindowResult], skipped: usize) -> BacktestSummary {
    let mean_metrics = (!results.is_empty()).then(|| {
        let n = results.len() as f64;
        let sum = results.iter().fold(EvaluationMetrics::default(), |acc, r| EvaluationMetrics {
            log_loss: acc.log_loss + r.metrics.log_loss,
            brier_score: acc.brier_score + r.metrics.brier_score,
            accuracy: acc.accuracy + r.metrics.accuracy,
            auc_roc: acc.auc_roc + r.metrics.auc_roc,
        });
        EvaluationMetrics {
            log_loss: sum.log_loss / n,
            brier_score: sum.brier_score / n,
            accuracy: sum.accuracy / n,
            auc_roc: sum.auc_roc / n,
        }
    });

    BacktestSummary {
        windows: results.len(),
        skipped,
        mean_metrics,
        staking: StakingSummary::merge(results.iter().map(|r| &r.staking)),
        promotions: results.iter().filter(|r| r.decision.is_promote()).count(),
    }
}
