//! Chronological dataset splitting
//!
//! Rows are ordered by timestamp (ties by match id) and cut at
//! `floor(n * train_ratio)` and `floor(n * (train_ratio + val_ratio))`, so every
//! training row precedes every validation row, which precedes every test row.

use crate::config::SplitConfig;
use crate::error::{PipelineError, Result};
use crate::types::{sort_chronologically, Dataset, MatchRow, TrainingWindow};

/// Absorbs binary representation error in products like `1000 * 0.7`
const CUT_EPSILON: f64 = 1e-9;

/// Three disjoint, time-contiguous segments
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<MatchRow>,
    pub validation: Vec<MatchRow>,
    pub test: Vec<MatchRow>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time span covered by the rows used to fit and calibrate (train + validation)
    pub fn training_window(&self) -> Option<TrainingWindow> {
        let start = self.train.first()?.timestamp;
        let end = self
            .validation
            .last()
            .or_else(|| self.train.last())?
            .timestamp;
        Some(TrainingWindow { start, end })
    }
}

/// Splits labeled rows by time
#[derive(Debug, Clone, Copy)]
pub struct DatasetSplitter {
    train_ratio: f64,
    val_ratio: f64,
}

impl DatasetSplitter {
    pub fn new(train_ratio: f64, val_ratio: f64) -> Result<Self> {
        let in_unit = |r: f64| r > 0.0 && r < 1.0;
        if !in_unit(train_ratio) || !in_unit(val_ratio) || train_ratio + val_ratio >= 1.0 {
            return Err(PipelineError::InvalidRatio {
                train_ratio,
                val_ratio,
            });
        }
        Ok(Self {
            train_ratio,
            val_ratio,
        })
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self> {
        Self::new(config.train_ratio, config.val_ratio)
    }

    /// Share of the train + validation rows that goes to training
    pub fn fit_fraction(&self) -> f64 {
        self.train_ratio / (self.train_ratio + self.val_ratio)
    }

    pub fn split(&self, dataset: &Dataset) -> Result<Split> {
        self.split_rows(dataset.rows().to_vec())
    }

    pub fn split_rows(&self, mut rows: Vec<MatchRow>) -> Result<Split> {
        sort_chronologically(&mut rows);

        let n = rows.len();
        let train_end = cut_index(n, self.train_ratio);
        let val_end = cut_index(n, self.train_ratio + self.val_ratio).max(train_end);

        let test = rows.split_off(val_end);
        let validation = rows.split_off(train_end);
        let train = rows;

        for (segment, len) in [("train", train.len()), ("validation", validation.len()), ("test", test.len())] {
            if len == 0 {
                return Err(PipelineError::InsufficientData(format!(
                    "{} segment is empty after splitting {} rows",
                    segment, n
                )));
            }
        }

        tracing::debug!(
            train = train.len(),
            validation = validation.len(),
            test = test.len(),
            "Split dataset chronologically"
        );

        Ok(Split {
            train,
            validation,
            test,
        })
    }

    /// Two-way chronological split used inside backtest windows
    pub fn holdout(mut rows: Vec<MatchRow>, fit_fraction: f64) -> Result<(Vec<MatchRow>, Vec<MatchRow>)> {
        if !(fit_fraction > 0.0 && fit_fraction < 1.0) {
            return Err(PipelineError::InvalidRatio {
                train_ratio: fit_fraction,
                val_ratio: 1.0 - fit_fraction,
            });
        }

        sort_chronologically(&mut rows);
        let n = rows.len();
        let cut = cut_index(n, fit_fraction);
        let holdout = rows.split_off(cut);

        if rows.is_empty() || holdout.is_empty() {
            return Err(PipelineError::InsufficientData(format!(
                "cannot hold out {:.0}% of {} rows with both parts non-empty",
                (1.0 - fit_fraction) * 100.0,
                n
            )));
        }

        Ok((rows, holdout))
    }
}

fn cut_index(n: usize, ratio: f64) -> usize {
    ((n as f64 * ratio + CUT_EPSILON).floor() as usize).min(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureSchema, Market};
    use chrono::{Duration, TimeZone, Utc};

    fn rows(n: usize) -> Vec<MatchRow> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| MatchRow {
                // Deliberately out of order
                match_id: format!("m{:04}", (i * 7) % n),
                timestamp: start + Duration::hours(((i * 7) % n) as i64),
                features: vec![i as f64],
                label: i % 2 == 0,
                odds: 1.9,
            })
            .collect()
    }

    fn dataset(n: usize) -> Dataset {
        let schema = FeatureSchema::new("test", 1, vec!["x".to_string()]);
        Dataset::new(Market::Goals, schema, rows(n)).unwrap()
    }

    #[test]
    fn test_split_sizes_70_15_15() {
        let splitter = DatasetSplitter::new(0.7, 0.15).unwrap();
        let split = splitter.split(&dataset(1000)).unwrap();

        assert_eq!(split.train.len(), 700);
        assert_eq!(split.validation.len(), 150);
        assert_eq!(split.test.len(), 150);
    }

    #[test]
    fn test_split_has_no_look_ahead() {
        let splitter = DatasetSplitter::new(0.6, 0.2).unwrap();
        for n in [5, 17, 101, 333] {
            let split = splitter.split(&dataset(n)).unwrap();

            let max_train = split.train.iter().map(|r| r.timestamp).max().unwrap();
            let min_val = split.validation.iter().map(|r| r.timestamp).min().unwrap();
            let max_val = split.validation.iter().map(|r| r.timestamp).max().unwrap();
            let min_test = split.test.iter().map(|r| r.timestamp).min().unwrap();

            assert!(max_train <= min_val);
            assert!(max_val <= min_test);
            assert_eq!(split.len(), n);
        }
    }

    #[test]
    fn test_ties_broken_by_match_id() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        let tied: Vec<MatchRow> = ["c", "a", "d", "b", "e", "f", "g", "h", "i", "j"]
            .iter()
            .map(|id| MatchRow {
                match_id: id.to_string(),
                timestamp: ts,
                features: vec![0.0],
                label: true,
                odds: 2.0,
            })
            .collect();

        let split = DatasetSplitter::new(0.5, 0.2).unwrap().split_rows(tied).unwrap();
        let ids: Vec<&str> = split.train.iter().map(|r| r.match_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_invalid_ratios_rejected() {
        assert!(matches!(
            DatasetSplitter::new(0.0, 0.2),
            Err(PipelineError::InvalidRatio { .. })
        ));
        assert!(matches!(
            DatasetSplitter::new(0.8, 0.2),
            Err(PipelineError::InvalidRatio { .. })
        ));
        assert!(matches!(
            DatasetSplitter::new(0.5, 1.0),
            Err(PipelineError::InvalidRatio { .. })
        ));
    }

    #[test]
    fn test_empty_segment_is_insufficient_data() {
        let splitter = DatasetSplitter::new(0.7, 0.15).unwrap();
        let result = splitter.split(&dataset(3));
        assert!(matches!(result, Err(PipelineError::InsufficientData(_))));
    }

    #[test]
    fn test_holdout_keeps_order() {
        let (fit, holdout) = DatasetSplitter::holdout(rows(20), 0.75).unwrap();
        assert_eq!(fit.len(), 15);
        assert_eq!(holdout.len(), 5);
        assert!(fit.last().unwrap().timestamp <= holdout.first().unwrap().timestamp);
    }
}
