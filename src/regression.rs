//! Linear regression over monthly category aggregates.
//!
//! Features are an intercept, the standardized month index, a one-hot
//! entity indicator, and a one-hot category indicator. The label is the
//! monthly expense. Coefficients are the solution of the ridge-regularized
//! normal equations
//!
//! ```text
//! (XᵀX + λD) β = Xᵀy        D = diag(0, 1, 1, …)
//! ```
//!
//! solved by Gaussian elimination with partial pivoting. The intercept is
//! not penalized. With a small λ this is ordinary least squares wherever
//! OLS is well-posed, and it stays solvable when the one-hot blocks are
//! collinear with the intercept.
//!
//! At prediction time an entity or category that was not seen in training
//! contributes zero.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_RIDGE: f64 = 1e-3;

const PIVOT_EPSILON: f64 = 1e-12;

/// One aggregate row: `value` spent by `entity` on `category` in a month.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub entity: String,
    pub category: String,
    pub month_index: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub month_mean: f64,
    pub month_scale: f64,
    pub month_coef: f64,
    pub entity_coefs: BTreeMap<String, f64>,
    pub category_coefs: BTreeMap<String, f64>,
    pub samples: usize,
}

impl LinearModel {
    pub fn fit(rows: &[TrainingRow], ridge: f64) -> Result<Self> {
        if rows.is_empty() {
            bail!("no training rows");
        }
        if rows.iter().any(|r| !r.value.is_finite()) {
            bail!("training labels must be finite");
        }

        let n = rows.len() as f64;
        let month_mean = rows.iter().map(|r| r.month_index as f64).sum::<f64>() / n;
        let variance = rows
            .iter()
            .map(|r| (r.month_index as f64 - month_mean).powi(2))
            .sum::<f64>()
            / n;
        let month_scale = if variance.sqrt() < 1e-9 {
            1.0
        } else {
            variance.sqrt()
        };

        let entities = levels(rows.iter().map(|r| r.entity.as_str()));
        let categories = levels(rows.iter().map(|r| r.category.as_str()));
        let width = 2 + entities.len() + categories.len();

        let features = |row: &TrainingRow| -> Vec<f64> {
            let mut x = vec![0.0; width];
            x[0] = 1.0;
            x[1] = (row.month_index as f64 - month_mean) / month_scale;
            if let Some(i) = entities.iter().position(|e| e == &row.entity) {
                x[2 + i] = 1.0;
            }
            if let Some(i) = categories.iter().position(|c| c == &row.category) {
                x[2 + entities.len() + i] = 1.0;
            }
            x
        };

        // normal equations, augmented with Xᵀy in the last column
        let mut system = vec![vec![0.0; width + 1]; width];
        for row in rows {
            let x = features(row);
            for i in 0..width {
                for j in 0..width {
                    system[i][j] += x[i] * x[j];
                }
                system[i][width] += x[i] * row.value;
            }
        }
        for (i, eq) in system.iter_mut().enumerate().skip(1) {
            eq[i] += ridge;
        }

        let beta = solve(system)?;

        let entity_coefs = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.clone(), beta[2 + i]))
            .collect();
        let category_coefs = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), beta[2 + entities.len() + i]))
            .collect();

        Ok(Self {
            intercept: beta[0],
            month_mean,
            month_scale,
            month_coef: beta[1],
            entity_coefs,
            category_coefs,
            samples: rows.len(),
        })
    }

    pub fn predict(&self, entity: &str, category: &str, month_index: i64) -> f64 {
        self.intercept
            + self.month_coef * (month_index as f64 - self.month_mean) / self.month_scale
            + self.entity_coefs.get(entity).copied().unwrap_or(0.0)
            + self.category_coefs.get(category).copied().unwrap_or(0.0)
    }
}

fn levels<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = values.map(str::to_string).collect();
    out.sort();
    out.dedup();
    out
}

/// Gaussian elimination with partial pivoting on an `n × (n+1)` augmented
/// matrix.
fn solve(mut m: Vec<Vec<f64>>) -> Result<Vec<f64>> {
    let n = m.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < PIVOT_EPSILON {
            bail!("singular system at column {}", col);
        }
        m.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..=n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| m[row][k] * x[k]).sum();
        x[row] = (m[row][n] - tail) / m[row][row];
    }
    Ok(x)
}
