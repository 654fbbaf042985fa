//! Probability calibration
//!
//! Maps raw ensemble probabilities onto calibrated ones using a monotone
//! mapping fitted on the validation segment:
//! - Isotonic regression (pool adjacent violators), linear interpolation
//!   between fitted points, clipped outside the fitted range
//! - Sigmoid (Platt) scaling: `p = 1 / (1 + exp(-(a * raw + b)))`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::family::sigmoid;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CalibrationMethod {
    Isotonic,
    Sigmoid,
}

impl CalibrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationMethod::Isotonic => "isotonic",
            CalibrationMethod::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "isotonic" => Ok(CalibrationMethod::Isotonic),
            "sigmoid" | "platt" => Ok(CalibrationMethod::Sigmoid),
            _ => Err(PipelineError::UnknownCalibrationMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for CalibrationMethod {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CalibrationMethod> for String {
    fn from(method: CalibrationMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Fitted calibration mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CalibrationModel {
    /// Fitted points, `x` strictly increasing and `y` non-decreasing
    Isotonic { x: Vec<f64>, y: Vec<f64> },
    Sigmoid { a: f64, b: f64 },
}

impl CalibrationModel {
    pub fn method(&self) -> CalibrationMethod {
        match self {
            CalibrationModel::Isotonic { .. } => CalibrationMethod::Isotonic,
            CalibrationModel::Sigmoid { .. } => CalibrationMethod::Sigmoid,
        }
    }

    pub fn apply_one(&self, raw: f64) -> f64 {
        match self {
            CalibrationModel::Isotonic { x, y } => interpolate(x, y, raw),
            CalibrationModel::Sigmoid { a, b } => sigmoid(a * raw + b),
        }
        .clamp(0.0, 1.0)
    }
}

pub struct Calibrator;

impl Calibrator {
    pub fn fit(raw: &[f64], labels: &[bool], method: CalibrationMethod) -> Result<CalibrationModel> {
        if raw.len() != labels.len() {
            return Err(PipelineError::LengthMismatch {
                expected: raw.len(),
                actual: labels.len(),
            });
        }
        if raw.is_empty() {
            return Err(PipelineError::InsufficientData(
                "calibration needs at least one validation prediction".to_string(),
            ));
        }

        let model = match method {
            CalibrationMethod::Isotonic => fit_isotonic(raw, labels),
            CalibrationMethod::Sigmoid => fit_sigmoid(raw, labels),
        };
        tracing::debug!(%method, samples = raw.len(), "Fitted calibration mapping");
        Ok(model)
    }

    /// Method given by name, as it appears in configuration
    pub fn fit_named(raw: &[f64], labels: &[bool], method: &str) -> Result<CalibrationModel> {
        Self::fit(raw, labels, method.parse()?)
    }

    pub fn apply(model: &CalibrationModel, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|p| model.apply_one(*p)).collect()
    }
}

struct Block {
    x_min: f64,
    x_max: f64,
    sum: f64,
    weight: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.weight
    }
}

/// Pool adjacent violators over (raw, label) pairs
fn fit_isotonic(raw: &[f64], labels: &[bool]) -> CalibrationModel {
    let mut pairs: Vec<(f64, f64)> = raw
        .iter()
        .zip(labels)
        .map(|(x, label)| (*x, if *label { 1.0 } else { 0.0 }))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
    for (x, y) in pairs {
        // Ties in x collapse into one block before pooling
        if let Some(last) = blocks.last_mut() {
            if last.x_max == x {
                last.sum += y;
                last.weight += 1.0;
                pool(&mut blocks);
                continue;
            }
        }
        blocks.push(Block {
            x_min: x,
            x_max: x,
            sum: y,
            weight: 1.0,
        });
        pool(&mut blocks);
    }

    let mut xs = Vec::with_capacity(blocks.len() * 2);
    let mut ys = Vec::with_capacity(blocks.len() * 2);
    for block in &blocks {
        let mean = block.mean();
        xs.push(block.x_min);
        ys.push(mean);
        if block.x_max > block.x_min {
            xs.push(block.x_max);
            ys.push(mean);
        }
    }

    CalibrationModel::Isotonic { x: xs, y: ys }
}

fn pool(blocks: &mut Vec<Block>) {
    while blocks.len() >= 2 {
        let n = blocks.len();
        if blocks[n - 2].mean() <= blocks[n - 1].mean() {
            break;
        }
        if let Some(last) = blocks.pop() {
            if let Some(prev) = blocks.last_mut() {
                prev.x_max = last.x_max;
                prev.sum += last.sum;
                prev.weight += last.weight;
            }
        }
    }
}

fn interpolate(x: &[f64], y: &[f64], value: f64) -> f64 {
    let (Some(&x_first), Some(&x_last)) = (x.first(), x.last()) else {
        return value;
    };
    if value.is_nan() {
        return y[0];
    }
    if value <= x_first {
        return y[0];
    }
    if value >= x_last {
        return y[y.len() - 1];
    }

    let hi = x.partition_point(|v| *v <= value);
    let lo = hi - 1;
    let span = x[hi] - x[lo];
    if span <= 0.0 {
        return y[lo];
    }
    y[lo] + (y[hi] - y[lo]) * (value - x[lo]) / span
}

/// Platt scaling with smoothed targets, fitted by Newton's method
fn fit_sigmoid(raw: &[f64], labels: &[bool]) -> CalibrationModel {
    let positives = labels.iter().filter(|l| **l).count() as f64;
    let negatives = labels.len() as f64 - positives;
    let hi = (positives + 1.0) / (positives + 2.0);
    let lo = 1.0 / (negatives + 2.0);
    let targets: Vec<f64> = labels.iter().map(|l| if *l { hi } else { lo }).collect();

    let loss = |a: f64, b: f64| -> f64 {
        raw.iter()
            .zip(&targets)
            .map(|(s, t)| {
                let p = sigmoid(a * s + b).clamp(1e-15, 1.0 - 1e-15);
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((positives + 1.0) / (negatives + 1.0)).ln();
    let mut current = loss(a, b);

    for _ in 0..100 {
        let (mut ga, mut gb, mut haa, mut hab, mut hbb) = (0.0, 0.0, 1e-12, 0.0, 1e-12);
        for (s, t) in raw.iter().zip(&targets) {
            let p = sigmoid(a * s + b);
            let d = p - t;
            let w = (p * (1.0 - p)).max(1e-12);
            ga += d * s;
            gb += d;
            haa += w * s * s;
            hab += w * s;
            hbb += w;
        }

        let det = haa * hbb - hab * hab;
        if det.abs() < 1e-18 {
            break;
        }
        let da = (hbb * ga - hab * gb) / det;
        let db = (haa * gb - hab * ga) / det;

        let mut step = 1.0;
        let mut improved = false;
        while step > 1e-10 {
            let (na, nb) = (a - step * da, b - step * db);
            let value = loss(na, nb);
            if value.is_finite() && value < current + 1e-12 {
                a = na;
                b = nb;
                current = value;
                improved = true;
                break;
            }
            step *= 0.5;
        }

        if !improved || (step * da).abs().max((step * db).abs()) < 1e-10 {
            break;
        }
    }

    CalibrationModel::Sigmoid { a, b }
}
