use super::*;
use crate::config::{BacktestConfig, PipelineConfig};
use crate::data::{SyntheticConfig, SyntheticGenerator};
use crate::error::PipelineError;
use crate::ml::{AlgorithmFamily, BoostingParams};
use crate::types::{Dataset, Market};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 1000 matches twelve hours apart, roughly sixteen and a half months
fn dataset(rows: usize) -> Dataset {
    SyntheticGenerator::new(SyntheticConfig {
        rows,
        ..Default::default()
    })
    .generate(Market::Goals)
    .unwrap()
}

fn config(backtest: BacktestConfig) -> Arc<PipelineConfig> {
    let mut config = PipelineConfig::default();
    config.trainer.families = vec![AlgorithmFamily::Logistic, AlgorithmFamily::GradientBoostedTreesA];
    config.trainer.boosted_a = BoostingParams {
        n_estimators: 15,
        max_depth: 3,
        ..BoostingParams::depth_wise()
    };
    config.ensemble.weights = BTreeMap::from([
        (AlgorithmFamily::Logistic, 0.5),
        (AlgorithmFamily::GradientBoostedTreesA, 0.5),
    ]);
    config.backtest = backtest;
    Arc::new(config)
}

fn quarterly(anchored: bool) -> BacktestConfig {
    BacktestConfig {
        initial_train_months: 6,
        step_months: 3,
        min_test_matches: 40,
        anchored,
    }
}

#[test]
fn test_rolling_backtest_evaluates_windows_in_order() {
    let report = WalkForwardBacktester::new(config(quarterly(false)))
        .run(&dataset(1000))
        .unwrap();

    assert_eq!(report.market, Market::Goals);
    assert_eq!(report.windows.len(), 4);
    assert!(report.skipped.is_empty());

    for pair in report.windows.windows(2) {
        assert!(pair[0].window.index < pair[1].window.index);
        assert!(pair[0].window.train_end < pair[1].window.train_end);
        assert!(pair[0].window.train_start < pair[1].window.train_start);
    }

    for result in &report.windows {
        assert!(result.test_rows >= 40);
        assert!(result.metrics.is_finite());
        assert!((0.0..=1.0).contains(&result.metrics.auc_roc));
        assert_eq!(result.families.len(), 2);
        if result.decision.is_promote() {
            assert!(result.serving_version.is_some());
        }
        assert_eq!(result.staking.roi.is_none(), result.staking.bets == 0);
    }

    let summary = &report.summary;
    assert_eq!(summary.windows, 4);
    assert!(summary.mean_metrics.is_some());
    assert_eq!(
        summary.staking.bets,
        report.windows.iter().map(|r| r.staking.bets).sum::<usize>()
    );
    assert_eq!(
        summary.promotions,
        report.windows.iter().filter(|r| r.decision.is_promote()).count()
    );
}

#[test]
fn test_anchored_training_horizon_grows() {
    let report = WalkForwardBacktester::new(config(quarterly(true)))
        .run(&dataset(1000))
        .unwrap();

    let first_start = report.windows[0].window.train_start;
    for pair in report.windows.windows(2) {
        assert_eq!(pair[1].window.train_start, first_start);
        assert!(pair[1].train_rows > pair[0].train_rows);
    }
}

#[test]
fn test_promotions_advance_simulated_versions() {
    let report = WalkForwardBacktester::new(config(quarterly(true)))
        .run(&dataset(1000))
        .unwrap();

    let mut previous = None;
    for result in &report.windows {
        if result.decision.is_promote() {
            assert!(result.serving_version > previous);
        } else {
            assert_eq!(result.serving_version, previous);
        }
        previous = result.serving_version;
    }
}

#[test]
fn test_short_test_slices_are_skipped() {
    // Monthly steps leave about 60 test rows per window
    let report = WalkForwardBacktester::new(config(BacktestConfig {
        initial_train_months: 6,
        step_months: 1,
        min_test_matches: 80,
        anchored: false,
    }))
    .run(&dataset(1000))
    .unwrap();

    assert!(report.windows.is_empty());
    assert!(!report.skipped.is_empty());
    assert_eq!(report.summary.skipped, report.skipped.len());
    assert!(report.summary.mean_metrics.is_none());
    assert_eq!(report.summary.staking.roi, None);
    assert_eq!(report.summary.promotions, 0);
}

#[test]
fn test_history_shorter_than_horizon_is_an_error() {
    let result = WalkForwardBacktester::new(config(quarterly(false))).run(&dataset(300));
    assert!(matches!(result, Err(PipelineError::InsufficientData(_))));
}

#[test]
fn test_zero_step_rejected_before_windowing() {
    let result = WalkForwardBacktester::new(config(BacktestConfig {
        step_months: 0,
        ..quarterly(false)
    }))
    .run(&dataset(1000));
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}
