//! Integration tests for the ML module

use super::*;
use crate::config::TrainerConfig;
use crate::data::{DatasetSplitter, SyntheticConfig, SyntheticGenerator};
use crate::types::{Market, MatchRow};
use std::collections::BTreeMap;

fn quick_trainer() -> ModelTrainer {
    let config = TrainerConfig {
        boosted_a: BoostingParams {
            n_estimators: 30,
            learning_rate: 0.1,
            max_depth: 3,
            ..BoostingParams::depth_wise()
        },
        boosted_b: BoostingParams {
            n_estimators: 30,
            learning_rate: 0.1,
            max_leaves: 8,
            ..BoostingParams::leaf_wise()
        },
        ..Default::default()
    };
    ModelTrainer::from_config(&config)
}

fn labels(rows: &[MatchRow]) -> Vec<bool> {
    rows.iter().map(|r| r.label).collect()
}

#[test]
fn test_full_ml_pipeline() {
    // 1. Data and chronological split
    let dataset = SyntheticGenerator::new(SyntheticConfig {
        rows: 600,
        signal_strength: 1.5,
        ..Default::default()
    })
    .generate(Market::Goals)
    .unwrap();
    let split = DatasetSplitter::new(0.7, 0.15).unwrap().split(&dataset).unwrap();

    // 2. Every configured family fits
    let output = quick_trainer().train(&split.train, &split.validation).unwrap();
    assert_eq!(output.models.len(), 3);

    // 3. Weighted ensemble over the validation segment
    let combiner = EnsembleCombiner::new(EnsembleSpec::new(BTreeMap::from([
        (AlgorithmFamily::Logistic, 0.2),
        (AlgorithmFamily::GradientBoostedTreesA, 0.5),
        (AlgorithmFamily::GradientBoostedTreesB, 0.3),
    ]))
    .unwrap());
    let per_family: BTreeMap<AlgorithmFamily, Vec<f64>> = output
        .models
        .iter()
        .map(|(family, model)| (*family, model.predict_rows(&split.validation)))
        .collect();
    let raw = combiner.combine(&per_family).unwrap();
    assert_eq!(raw.len(), split.validation.len());

    // 4. Calibrate on validation, evaluate on test
    let calibration = Calibrator::fit(&raw, &labels(&split.validation), CalibrationMethod::Isotonic).unwrap();
    let test_per_family: BTreeMap<AlgorithmFamily, Vec<f64>> = output
        .models
        .iter()
        .map(|(family, model)| (*family, model.predict_rows(&split.test)))
        .collect();
    let test_probs = Calibrator::apply(&calibration, &combiner.combine(&test_per_family).unwrap());

    let metrics = MetricsEvaluator::evaluate(&labels(&split.test), &test_probs).unwrap();
    assert!(metrics.is_finite());
    // The synthetic signal is strong enough to beat a coin flip
    assert!(metrics.auc_roc > 0.6);
    assert!(metrics.brier_score < 0.25);
}

#[test]
fn test_calibration_does_not_worsen_in_sample_brier() {
    let dataset = SyntheticGenerator::new(SyntheticConfig {
        rows: 400,
        ..Default::default()
    })
    .generate(Market::Btts)
    .unwrap();
    let split = DatasetSplitter::new(0.6, 0.3).unwrap().split(&dataset).unwrap();
    let output = quick_trainer().train(&split.train, &split.validation).unwrap();

    let model = &output.models[&AlgorithmFamily::GradientBoostedTreesA];
    let raw = model.predict_rows(&split.validation);
    let y = labels(&split.validation);

    let before = MetricsEvaluator::evaluate(&y, &raw).unwrap();
    let calibration = Calibrator::fit(&raw, &y, CalibrationMethod::Isotonic).unwrap();
    let after = MetricsEvaluator::evaluate(&y, &Calibrator::apply(&calibration, &raw)).unwrap();

    assert!(after.brier_score <= before.brier_score + 1e-12);
}

#[test]
fn test_importance_tracks_informative_features() {
    let dataset = SyntheticGenerator::new(SyntheticConfig {
        rows: 500,
        signal_strength: 2.0,
        ..Default::default()
    })
    .generate(Market::Cards)
    .unwrap();
    let split = DatasetSplitter::new(0.7, 0.15).unwrap().split(&dataset).unwrap();
    let output = quick_trainer().train(&split.train, &split.validation).unwrap();

    for model in output.models.values() {
        let importance = model.feature_importance();
        assert_eq!(importance.len(), dataset.schema().len());
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // Coefficients decay with column index, so the first column dominates the last
        assert!(importance[0] > importance[importance.len() - 1]);
    }
}
