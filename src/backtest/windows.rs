//! Walk-forward window generation

use chrono::{DateTime, Months, Utc};
use serde::Serialize;

use crate::config::BacktestConfig;
use crate::types::MatchRow;

/// One train/test cycle. Training covers `[train_start, train_end]`; testing
/// covers `[test_start, test_end)` excluding anything already in training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BacktestWindow {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

impl BacktestWindow {
    pub fn contains_train(&self, t: DateTime<Utc>) -> bool {
        self.train_start <= t && t <= self.train_end
    }

    pub fn contains_test(&self, t: DateTime<Utc>) -> bool {
        self.test_start <= t && t < self.test_end && t > self.train_end
    }
}

/// Windows over `rows` (sorted chronologically), starting at the first row.
///
/// Rolling mode slides the whole training horizon forward by one step per
/// window; anchored mode keeps the start fixed and extends the end. Generation
/// stops once fewer than `min_test_matches` rows remain at or after the next
/// test start.
pub fn generate_windows(rows: &[MatchRow], config: &BacktestConfig) -> Vec<BacktestWindow> {
    let Some(origin) = rows.first().map(|r| r.timestamp) else {
        return Vec::new();
    };
    // A zero step would repeat the first window forever
    if config.step_months == 0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    for index in 0usize.. {
        let Some(offset) = config.step_months.checked_mul(index as u32).map(Months::new) else {
            break;
        };
        let train_start = if config.anchored {
            Some(origin)
        } else {
            origin.checked_add_months(offset)
        };
        let train_end = origin
            .checked_add_months(Months::new(config.initial_train_months))
            .and_then(|t| t.checked_add_months(offset));
        let (Some(train_start), Some(train_end)) = (train_start, train_end) else {
            break;
        };
        let Some(test_end) = train_end.checked_add_months(Months::new(config.step_months)) else {
            break;
        };

        let remaining = rows.len() - rows.partition_point(|r| r.timestamp < train_end);
        if remaining < config.min_test_matches {
            break;
        }

        windows.push(BacktestWindow {
            index,
            train_start,
            train_end,
            test_start: train_end,
            test_end,
        });
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn daily_rows(days: i64) -> Vec<MatchRow> {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        (0..days)
            .map(|d| MatchRow {
                match_id: format!("m{}", d),
                timestamp: start + Duration::days(d),
                features: vec![0.0],
                label: d % 2 == 0,
                odds: 2.0,
            })
            .collect()
    }

    fn config(anchored: bool) -> BacktestConfig {
        BacktestConfig {
            initial_train_months: 3,
            step_months: 1,
            min_test_matches: 20,
            anchored,
        }
    }

    #[test]
    fn test_rolling_windows_slide_forward() {
        let rows = daily_rows(365);
        let windows = generate_windows(&rows, &config(false));

        assert!(!windows.is_empty());
        let first = windows[0];
        assert_eq!(first.train_start, rows[0].timestamp);
        assert_eq!(first.test_start, first.train_end);
        assert_eq!(first.train_end, Utc.with_ymd_and_hms(2023, 4, 1, 12, 0, 0).unwrap());
        assert_eq!(first.test_end, Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap());

        for pair in windows.windows(2) {
            assert!(pair[1].train_start > pair[0].train_start);
            assert_eq!(pair[1].test_start, pair[0].test_end);
        }

        // The last window still has at least min_test rows from its test start
        let last = windows[windows.len() - 1];
        let remaining = rows.iter().filter(|r| r.timestamp >= last.test_start).count();
        assert!(remaining >= 20);
        let after = rows.iter().filter(|r| r.timestamp >= last.test_end).count();
        assert!(after < 20);
    }

    #[test]
    fn test_anchored_windows_keep_start() {
        let rows = daily_rows(240);
        let windows = generate_windows(&rows, &config(true));
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.train_start == rows[0].timestamp));
    }

    #[test]
    fn test_zero_step_yields_no_windows() {
        let config = BacktestConfig {
            step_months: 0,
            ..config(false)
        };
        assert!(generate_windows(&daily_rows(365), &config).is_empty());
    }

    #[test]
    fn test_boundary_row_is_training_only() {
        let rows = daily_rows(200);
        let w = generate_windows(&rows, &config(false))[0];
        assert!(w.contains_train(w.train_end));
        assert!(!w.contains_test(w.train_end));
        assert!(!w.contains_test(w.test_end));
    }

    #[test]
    fn test_too_little_data_yields_no_windows() {
        let rows = daily_rows(100);
        assert!(generate_windows(&rows, &config(false)).is_empty());
        assert!(generate_windows(&[], &config(false)).is_empty());
    }
}
