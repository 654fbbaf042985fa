//! L2-regularized logistic regression
//!
//! Features are standardized with training-set statistics, then the penalized
//! log-likelihood is minimized with damped Newton steps. The penalty follows
//! the usual `C` convention: objective = mean log loss + ||w||^2 / (2 * C * n).

use serde::{Deserialize, Serialize};

use super::family::{check_training_rows, sigmoid};
use crate::error::FitError;
use crate::types::MatchRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Inverse regularization strength
    #[serde(default = "default_c")]
    pub c: f64,
    /// Convergence tolerance on the Newton step
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_max_iter() -> usize {
    1000
}

fn default_c() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    1e-8
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            c: default_c(),
            tolerance: default_tolerance(),
        }
    }
}

/// Fitted logistic regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
    iterations: usize,
}

impl LogisticModel {
    pub fn fit(params: &LogisticParams, rows: &[MatchRow]) -> Result<Self, FitError> {
        check_training_rows(rows, 2)?;
        if !(params.c > 0.0) {
            return Err(FitError::NumericalInstability(format!(
                "regularization C must be positive, got {}",
                params.c
            )));
        }

        let n = rows.len();
        let d = rows[0].features.len();
        let (means, scales) = standardization(rows, d);
        let z: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| standardize(&r.features, &means, &scales))
            .collect();
        let y: Vec<f64> = rows.iter().map(MatchRow::target).collect();

        let penalty = 1.0 / (params.c * n as f64);
        // theta = [w_0 .. w_{d-1}, b]
        let mut theta = vec![0.0; d + 1];
        let mut objective = penalized_loss(&z, &y, &theta, penalty);

        for iteration in 1..=params.max_iter {
            let (gradient, hessian) = gradient_and_hessian(&z, &y, &theta, penalty);
            let step = solve(hessian, gradient).ok_or_else(|| {
                FitError::NumericalInstability("singular Hessian in Newton step".to_string())
            })?;

            // Backtracking keeps every accepted step a descent step
            let mut t = 1.0;
            let mut candidate = theta.clone();
            let mut accepted = false;
            for _ in 0..40 {
                for (c, (th, s)) in candidate.iter_mut().zip(theta.iter().zip(&step)) {
                    *c = th - t * s;
                }
                let value = penalized_loss(&z, &y, &candidate, penalty);
                if value.is_finite() && value <= objective {
                    objective = value;
                    accepted = true;
                    break;
                }
                t *= 0.5;
            }

            if !objective.is_finite() {
                return Err(FitError::NumericalInstability("non-finite objective".to_string()));
            }

            let max_step = step.iter().map(|s| (t * s).abs()).fold(0.0, f64::max);
            if accepted {
                theta = candidate;
            }

            if max_step < params.tolerance || !accepted {
                let (weights, intercept) = split_theta(theta, d);
                return Ok(Self {
                    means,
                    scales,
                    weights,
                    intercept,
                    iterations: iteration,
                });
            }
        }

        Err(FitError::NonConvergence {
            iterations: params.max_iter,
        })
    }

    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = standardize(features, &self.means, &self.scales);
        let score: f64 = self.intercept + z.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>();
        sigmoid(score)
    }

    /// Coefficients on the standardized feature scale
    pub fn coefficients(&self) -> &[f64] {
        &self.weights
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn standardization(rows: &[MatchRow], d: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let mut means = vec![0.0; d];
    for row in rows {
        for (m, x) in means.iter_mut().zip(&row.features) {
            *m += x / n;
        }
    }

    let mut scales = vec![0.0; d];
    for row in rows {
        for (s, (x, m)) in scales.iter_mut().zip(row.features.iter().zip(&means)) {
            *s += (x - m).powi(2) / n;
        }
    }
    for s in scales.iter_mut() {
        *s = s.sqrt();
        if *s < 1e-12 {
            *s = 1.0;
        }
    }

    (means, scales)
}

fn standardize(features: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    features
        .iter()
        .zip(means.iter().zip(scales))
        .map(|(x, (m, s))| (x - m) / s)
        .collect()
}

fn score(z: &[f64], theta: &[f64]) -> f64 {
    let d = z.len();
    theta[d] + z.iter().zip(&theta[..d]).map(|(x, w)| x * w).sum::<f64>()
}

fn penalized_loss(z: &[Vec<f64>], y: &[f64], theta: &[f64], penalty: f64) -> f64 {
    let n = y.len() as f64;
    let d = theta.len() - 1;
    let data_loss: f64 = z
        .iter()
        .zip(y)
        .map(|(row, target)| {
            let s = score(row, theta);
            // log(1 + e^s) - y*s, computed without overflow
            let softplus = if s > 0.0 { s + (-s).exp().ln_1p() } else { s.exp().ln_1p() };
            softplus - target * s
        })
        .sum::<f64>()
        / n;
    let reg: f64 = theta[..d].iter().map(|w| w * w).sum::<f64>() * penalty / 2.0;
    data_loss + reg
}

fn gradient_and_hessian(z: &[Vec<f64>], y: &[f64], theta: &[f64], penalty: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = y.len() as f64;
    let dim = theta.len();
    let d = dim - 1;
    let mut gradient = vec![0.0; dim];
    let mut hessian = vec![vec![0.0; dim]; dim];

    for (row, target) in z.iter().zip(y) {
        let p = sigmoid(score(row, theta));
        let residual = (p - target) / n;
        let curvature = (p * (1.0 - p)).max(1e-12) / n;

        for i in 0..dim {
            let xi = if i < d { row[i] } else { 1.0 };
            gradient[i] += residual * xi;
            for j in i..dim {
                let xj = if j < d { row[j] } else { 1.0 };
                hessian[i][j] += curvature * xi * xj;
            }
        }
    }

    for i in 0..dim {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }
    for i in 0..d {
        gradient[i] += penalty * theta[i];
        hessian[i][i] += penalty;
    }
    hessian[d][d] += 1e-10;

    (gradient, hessian)
}

/// Gaussian elimination with partial pivoting; `None` when singular
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-14 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn split_theta(mut theta: Vec<f64>, d: usize) -> (Vec<f64>, f64) {
    let intercept = theta[d];
    theta.truncate(d);
    (theta, intercept)
}
