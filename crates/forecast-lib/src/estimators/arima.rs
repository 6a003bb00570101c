//! ARIMA(p, d, q) estimation
//!
//! - differencing order from a Dickey-Fuller regression
//! - ARMA coefficients by Hannan-Rissanen two-stage regression
//! - conditional sum of squares scoring with AIC/BIC order selection
//! - forecast standard errors from psi-weights of the integrated model

use serde::{Deserialize, Serialize};

use super::linalg::{coefficient_std_errors, least_squares};
use super::stats::variance;
use crate::error::{PipelineError, Result};

/// 5% critical value of the Dickey-Fuller t-statistic (regression with constant)
pub const DF_CRITICAL_VALUE: f64 = -2.86;

const REGRESSION_JITTER: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    #[default]
    Aic,
    Bic,
}

/// Order search bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaConfig {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
    pub criterion: InformationCriterion,
}

impl Default for ArimaConfig {
    fn default() -> Self {
        Self {
            max_p: 2,
            max_d: 2,
            max_q: 2,
            criterion: InformationCriterion::Aic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl std::fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.p, self.d, self.q)
    }
}

/// One forecast step on the original scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArimaForecast {
    pub mean: f64,
    pub std_error: f64,
}

impl ArimaForecast {
    pub fn interval(&self, z: f64) -> (f64, f64) {
        (self.mean - z * self.std_error, self.mean + z * self.std_error)
    }
}

pub fn difference(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// t-statistic of the lagged level in `Δz_t = a + b z_{t-1} + e_t`
pub fn dickey_fuller_t(values: &[f64]) -> Option<f64> {
    if values.len() < 4 {
        return None;
    }
    let design: Vec<Vec<f64>> = values[..values.len() - 1]
        .iter()
        .map(|&lag| vec![1.0, lag])
        .collect();
    let target = difference(values);
    let beta = least_squares(&design, &target, 0.0).ok()?;
    let ssr: f64 = design
        .iter()
        .zip(&target)
        .map(|(row, y)| (y - beta[0] - beta[1] * row[1]).powi(2))
        .sum();
    let sst: f64 = target.iter().map(|y| y * y).sum();
    if ssr <= 1e-12 * sst.max(1.0) {
        // exact fit: only a clearly negative coefficient means mean reversion
        return Some(if beta[1] < -1e-9 {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    let dof = (target.len() as f64 - 2.0).max(1.0);
    let errors = coefficient_std_errors(&design, ssr / dof).ok()?;
    if errors[1] < 1e-15 {
        return None;
    }
    Some(beta[1] / errors[1])
}

/// Stationary when constant or when the Dickey-Fuller test rejects a unit root
pub fn is_stationary(values: &[f64]) -> bool {
    if values.len() < 4 {
        return false;
    }
    if variance(values) < 1e-12 {
        return true;
    }
    dickey_fuller_t(values)
        .map(|t| t < DF_CRITICAL_VALUE)
        .unwrap_or(false)
}

/// Smallest differencing order whose series is stationary
pub fn select_differencing(values: &[f64], max_d: usize) -> Option<usize> {
    let mut series = values.to_vec();
    for d in 0..=max_d {
        if is_stationary(&series) {
            return Some(d);
        }
        series = difference(&series);
    }
    None
}

#[derive(Debug, Clone)]
struct ArmaFit {
    intercept: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    residuals: Vec<f64>,
    css: f64,
    sigma2: f64,
    aic: f64,
    bic: f64,
}

fn fit_arma(w: &[f64], p: usize, q: usize) -> Result<ArmaFit> {
    let n = w.len();
    let mut innovations = vec![0.0; n];
    let mut start = p;

    if q > 0 {
        // stage one: long autoregression for innovation estimates
        let long = (p.max(q) + 3).min(n / 3);
        if long == 0 || n <= long + 2 {
            return Err(PipelineError::fit("series too short for MA terms"));
        }
        let (design, target): (Vec<Vec<f64>>, Vec<f64>) = (long..n)
            .map(|t| {
                let mut row = Vec::with_capacity(long + 1);
                row.push(1.0);
                row.extend((1..=long).map(|lag| w[t - lag]));
                (row, w[t])
            })
            .unzip();
        let beta = least_squares(&design, &target, REGRESSION_JITTER)?;
        for t in long..n {
            let pred: f64 = beta[0] + (1..=long).map(|lag| beta[lag] * w[t - lag]).sum::<f64>();
            innovations[t] = w[t] - pred;
        }
        start = start.max(long + q);
    }

    let k = 1 + p + q;
    if n <= start + k + 1 {
        return Err(PipelineError::fit(format!(
            "series of {} points too short for ARMA({}, {})",
            n, p, q
        )));
    }

    // stage two: regression on lagged values and lagged innovations
    let (design, target): (Vec<Vec<f64>>, Vec<f64>) = (start..n)
        .map(|t| {
            let mut row = Vec::with_capacity(k);
            row.push(1.0);
            row.extend((1..=p).map(|lag| w[t - lag]));
            row.extend((1..=q).map(|lag| innovations[t - lag]));
            (row, w[t])
        })
        .unzip();
    let beta = least_squares(&design, &target, REGRESSION_JITTER)?;
    let intercept = beta[0];
    let ar = beta[1..=p].to_vec();
    let ma = beta[p + 1..].to_vec();

    if ma.iter().map(|c| c.abs()).sum::<f64>() >= 1.0 {
        return Err(PipelineError::fit("non-invertible MA polynomial"));
    }

    // conditional sum of squares with pre-sample residuals at zero
    let mut residuals = vec![0.0; n];
    for t in p..n {
        let mut pred = intercept;
        for (i, phi) in ar.iter().enumerate() {
            pred += phi * w[t - 1 - i];
        }
        for (j, theta) in ma.iter().enumerate() {
            if t > j {
                pred += theta * residuals[t - 1 - j];
            }
        }
        residuals[t] = w[t] - pred;
    }
    let css: f64 = residuals[p..].iter().map(|e| e * e).sum();
    if !css.is_finite() {
        return Err(PipelineError::fit("diverging residual recursion"));
    }

    let n_eff = (n - p) as f64;
    let sigma2 = (css / n_eff).max(1e-12);
    let log_likelihood = -0.5 * n_eff * ((2.0 * std::f64::consts::PI * sigma2).ln() + 1.0);
    let params = (k + 1) as f64;
    Ok(ArmaFit {
        intercept,
        ar,
        ma,
        residuals,
        css,
        sigma2,
        aic: 2.0 * params - 2.0 * log_likelihood,
        bic: params * n_eff.ln() - 2.0 * log_likelihood,
    })
}

/// Fitted ARIMA model
#[derive(Debug, Clone)]
pub struct ArimaModel {
    pub order: ArimaOrder,
    pub intercept: f64,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sigma2: f64,
    pub css: f64,
    pub aic: f64,
    pub bic: f64,
    history: Vec<f64>,
    differenced: Vec<f64>,
    residuals: Vec<f64>,
}

impl ArimaModel {
    /// Select `d` by Dickey-Fuller, then `(p, q)` by the configured criterion
    pub fn fit(values: &[f64], config: &ArimaConfig) -> Result<Self> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::fit("non-finite value in series"));
        }
        let d = select_differencing(values, config.max_d).ok_or_else(|| {
            PipelineError::fit(format!(
                "series not stationary after {} differences",
                config.max_d
            ))
        })?;

        let mut differenced = values.to_vec();
        for _ in 0..d {
            differenced = difference(&differenced);
        }

        let mut best: Option<(ArimaOrder, ArmaFit)> = None;
        for p in 0..=config.max_p {
            for q in 0..=config.max_q {
                let Ok(fit) = fit_arma(&differenced, p, q) else {
                    continue;
                };
                let score = match config.criterion {
                    InformationCriterion::Aic => fit.aic,
                    InformationCriterion::Bic => fit.bic,
                };
                let better = match &best {
                    None => true,
                    Some((_, current)) => {
                        let current_score = match config.criterion {
                            InformationCriterion::Aic => current.aic,
                            InformationCriterion::Bic => current.bic,
                        };
                        score < current_score
                    }
                };
                if better {
                    best = Some((ArimaOrder { p, d, q }, fit));
                }
            }
        }

        let (order, fit) =
            best.ok_or_else(|| PipelineError::fit("no ARMA order could be estimated"))?;
        Ok(Self {
            order,
            intercept: fit.intercept,
            ar: fit.ar,
            ma: fit.ma,
            sigma2: fit.sigma2,
            css: fit.css,
            aic: fit.aic,
            bic: fit.bic,
            history: values.to_vec(),
            differenced,
            residuals: fit.residuals,
        })
    }

    /// One-step in-sample predictions paired with the observed values
    pub fn in_sample(&self) -> Vec<(f64, f64)> {
        let d = self.order.d;
        (self.order.p..self.differenced.len())
            .map(|t| {
                let observed = self.history[t + d];
                (observed, observed - self.residuals[t])
            })
            .collect()
    }

    /// Forecast `steps` values past the end of the history
    pub fn forecast(&self, steps: usize) -> Vec<ArimaForecast> {
        let mut w = self.differenced.clone();
        let mut e = self.residuals.clone();
        let mut diff_forecasts = Vec::with_capacity(steps);
        for _ in 0..steps {
            let t = w.len();
            let mut pred = self.intercept;
            for (i, phi) in self.ar.iter().enumerate() {
                if t > i {
                    pred += phi * w[t - 1 - i];
                }
            }
            for (j, theta) in self.ma.iter().enumerate() {
                if t > j {
                    pred += theta * e[t - 1 - j];
                }
            }
            w.push(pred);
            e.push(0.0);
            diff_forecasts.push(pred);
        }

        // integrate back through each differencing level
        let d = self.order.d;
        let mut levels = vec![self.history.clone()];
        for k in 1..d {
            let next = difference(&levels[k - 1]);
            levels.push(next);
        }
        let mut last: Vec<f64> = levels
            .iter()
            .map(|l| l.last().copied().unwrap_or(0.0))
            .collect();

        let psi = self.psi_weights(steps);
        let mut cumulative = 0.0;
        diff_forecasts
            .into_iter()
            .enumerate()
            .map(|(h, value)| {
                let mut level_value = value;
                for k in (0..d).rev() {
                    level_value += last[k];
                    last[k] = level_value;
                }
                cumulative += psi[h] * psi[h];
                ArimaForecast {
                    mean: level_value,
                    std_error: (self.sigma2 * cumulative).sqrt(),
                }
            })
            .collect()
    }

    /// MA(∞) weights of `φ(B)(1 - B)^d x_t = θ(B) e_t`
    fn psi_weights(&self, count: usize) -> Vec<f64> {
        let mut poly = vec![1.0];
        poly.extend(self.ar.iter().map(|phi| -phi));
        for _ in 0..self.order.d {
            let mut next = vec![0.0; poly.len() + 1];
            for (i, c) in poly.iter().enumerate() {
                next[i] += c;
                next[i + 1] -= c;
            }
            poly = next;
        }

        let mut psi = Vec::with_capacity(count);
        for j in 0..count {
            if j == 0 {
                psi.push(1.0);
                continue;
            }
            let mut value = self.ma.get(j - 1).copied().unwrap_or(0.0);
            for i in 1..poly.len().min(j + 1) {
                value += -poly[i] * psi[j - i];
            }
            psi.push(value);
        }
        psi
    }
}
