//! Ridge regression on standardized predictors

use super::linalg::least_squares;
use super::stats::{mean, r_squared, rmse};
use crate::error::{PipelineError, Result};

/// Fitted ridge model; stores the standardization so it predicts on raw rows
#[derive(Debug, Clone)]
pub struct RidgeModel {
    pub alpha: f64,
    means: Vec<f64>,
    scales: Vec<f64>,
    std_coefficients: Vec<f64>,
    y_mean: f64,
}

impl RidgeModel {
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self> {
        let n = x.len();
        if n < 2 || n != y.len() {
            return Err(PipelineError::fit("ridge regression needs at least two rows"));
        }
        let k = x[0].len();
        if k == 0 || x.iter().any(|r| r.len() != k) {
            return Err(PipelineError::fit("ragged design matrix"));
        }
        if alpha < 0.0 || !alpha.is_finite() {
            return Err(PipelineError::fit(format!("invalid ridge alpha {}", alpha)));
        }

        let means: Vec<f64> = (0..k)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n as f64)
            .collect();
        let scales: Vec<f64> = (0..k)
            .map(|j| {
                let var = x.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n as f64;
                let sd = var.sqrt();
                if sd < 1e-12 {
                    1.0
                } else {
                    sd
                }
            })
            .collect();
        let standardized: Vec<Vec<f64>> = x
            .iter()
            .map(|r| (0..k).map(|j| (r[j] - means[j]) / scales[j]).collect())
            .collect();
        let y_mean = mean(y);
        let centred: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        let std_coefficients = least_squares(&standardized, &centred, alpha)?;
        Ok(Self {
            alpha,
            means,
            scales,
            std_coefficients,
            y_mean,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.y_mean
            + self
                .std_coefficients
                .iter()
                .enumerate()
                .map(|(j, b)| b * (row[j] - self.means[j]) / self.scales[j])
                .sum::<f64>()
    }

    /// Coefficients expressed in the units of the raw predictors
    pub fn coefficients(&self) -> Vec<f64> {
        self.std_coefficients
            .iter()
            .zip(&self.scales)
            .map(|(b, s)| b / s)
            .collect()
    }

    pub fn intercept(&self) -> f64 {
        self.y_mean
            - self
                .coefficients()
                .iter()
                .zip(&self.means)
                .map(|(b, m)| b * m)
                .sum::<f64>()
    }

    /// R² and RMSE on the training rows
    pub fn training_fit(&self, x: &[Vec<f64>], y: &[f64]) -> (f64, f64) {
        let predicted: Vec<f64> = x.iter().map(|r| self.predict(r)).collect();
        (r_squared(y, &predicted), rmse(y, &predicted))
    }
}

/// Leave-one-out mean squared error of a ridge fit
pub fn loo_mse(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<f64> {
    let n = x.len();
    if n < 3 {
        return Err(PipelineError::fit("leave-one-out needs at least three rows"));
    }
    let mut total = 0.0;
    for held_out in 0..n {
        let train_x: Vec<Vec<f64>> = x
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != held_out)
            .map(|(_, r)| r.clone())
            .collect();
        let train_y: Vec<f64> = y
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != held_out)
            .map(|(_, v)| *v)
            .collect();
        let model = RidgeModel::fit(&train_x, &train_y, alpha)?;
        total += (model.predict(&x[held_out]) - y[held_out]).powi(2);
    }
    Ok(total / n as f64)
}

/// Candidate with the lowest leave-one-out error; the earliest wins ties
pub fn select_alpha(x: &[Vec<f64>], y: &[f64], candidates: &[f64]) -> Result<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for &alpha in candidates {
        let mse = loo_mse(x, y, alpha)?;
        if best.map(|(_, b)| mse < b).unwrap_or(true) {
            best = Some((alpha, mse));
        }
    }
    best.ok_or_else(|| PipelineError::fit("no ridge alpha candidates"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_rows() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..8)
            .map(|i| vec![i as f64, (i * i) as f64 * 0.1 + 3.0])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 5.0 + 2.0 * r[0] + 0.5 * r[1]).collect();
        (x, y)
    }

    #[test]
    fn test_small_alpha_recovers_coefficients() {
        let (x, y) = linear_rows();
        let model = RidgeModel::fit(&x, &y, 1e-8).unwrap();
        let coef = model.coefficients();
        assert!((coef[0] - 2.0).abs() < 1e-4);
        assert!((coef[1] - 0.5).abs() < 1e-4);
        assert!((model.intercept() - 5.0).abs() < 1e-3);
        let (r2, err) = model.training_fit(&x, &y);
        assert!(r2 > 0.999_999);
        assert!(err < 1e-4);
    }

    #[test]
    fn test_large_alpha_shrinks() {
        let (x, y) = linear_rows();
        let loose = RidgeModel::fit(&x, &y, 0.01).unwrap();
        let tight = RidgeModel::fit(&x, &y, 100.0).unwrap();
        let norm = |m: &RidgeModel| m.std_coefficients.iter().map(|c| c * c).sum::<f64>();
        assert!(norm(&tight) < norm(&loose));
    }

    #[test]
    fn test_alpha_selection_prefers_low_penalty_on_clean_data() {
        let (x, y) = linear_rows();
        let (alpha, mse) = select_alpha(&x, &y, &[0.01, 0.1, 1.0, 10.0, 100.0]).unwrap();
        assert_eq!(alpha, 0.01);
        assert!(mse.is_finite());
    }

    #[test]
    fn test_constant_column_is_tolerated() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = (0..5).map(|i| i as f64 * 3.0).collect();
        let model = RidgeModel::fit(&x, &y, 0.1).unwrap();
        assert!(model.predict(&[2.0, 1.0]).is_finite());
    }

    #[test]
    fn test_unpenalized_collinear_design_is_fit_error() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| i as f64).collect();
        assert!(matches!(
            RidgeModel::fit(&x, &y, 0.0),
            Err(PipelineError::ModelFit(_))
        ));
    }
}
