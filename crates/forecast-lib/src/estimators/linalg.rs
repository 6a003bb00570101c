//! Small dense linear algebra

use crate::error::{PipelineError, Result};

const PIVOT_EPSILON: f64 = 1e-12;

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(PipelineError::fit("system dimensions do not agree"));
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return Err(PipelineError::fit("singular linear system"));
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
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::fit("non-finite solution"));
    }
    Ok(x)
}

/// Least squares `min |X beta - y|^2 + ridge |beta|^2` through the normal equations
pub fn least_squares(design: &[Vec<f64>], y: &[f64], ridge: f64) -> Result<Vec<f64>> {
    let k = design.first().map(|r| r.len()).unwrap_or(0);
    if k == 0 || design.len() != y.len() {
        return Err(PipelineError::fit("empty or mismatched design matrix"));
    }
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, target) in design.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * target;
            for j in i..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
        xtx[i][i] += ridge;
    }
    solve(xtx, xty)
}

/// Standard errors of least-squares coefficients: `sqrt(sigma2 * diag((X'X)^-1))`
pub fn coefficient_std_errors(design: &[Vec<f64>], sigma2: f64) -> Result<Vec<f64>> {
    let k = design.first().map(|r| r.len()).unwrap_or(0);
    let mut xtx = vec![vec![0.0; k]; k];
    for row in design {
        for i in 0..k {
            for j in 0..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    let mut errors = Vec::with_capacity(k);
    for i in 0..k {
        let mut unit = vec![0.0; k];
        unit[i] = 1.0;
        let column = solve(xtx.clone(), unit)?;
        errors.push((sigma2 * column[i]).max(0.0).sqrt());
    }
    Ok(errors)
}
