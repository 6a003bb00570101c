//! Classical seasonal decomposition
//!
//! Trend by centred moving average (2×m MA for even periods), seasonal
//! component as normalized per-phase means of the detrended series.

use serde::{Deserialize, Serialize};

use super::stats::{mean, variance};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionMode {
    #[default]
    Additive,
    Multiplicative,
}

/// Trend, seasonal and residual components of a series
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub mode: DecompositionMode,
    pub period: usize,
    /// Undefined for the first and last half-period
    pub trend: Vec<Option<f64>>,
    /// One value per phase, `index % period`
    pub seasonal: Vec<f64>,
    pub residual: Vec<Option<f64>>,
}

impl Decomposition {
    pub fn seasonal_at(&self, index: usize) -> f64 {
        self.seasonal[index % self.period]
    }

    /// Removes the seasonal component from an observation at `index`
    pub fn deseasonalize(&self, index: usize, value: f64) -> f64 {
        match self.mode {
            DecompositionMode::Additive => value - self.seasonal_at(index),
            DecompositionMode::Multiplicative => {
                let s = self.seasonal_at(index);
                if s.abs() < 1e-12 {
                    value
                } else {
                    value / s
                }
            }
        }
    }

    /// Combines a trend level with the seasonal component at `index`
    pub fn recompose(&self, index: usize, trend: f64) -> f64 {
        match self.mode {
            DecompositionMode::Additive => trend + self.seasonal_at(index),
            DecompositionMode::Multiplicative => trend * self.seasonal_at(index),
        }
    }

    /// `max(0, 1 - Var(R) / Var(S + R))` over the points where the trend is defined
    pub fn seasonality_strength(&self) -> f64 {
        let mut residuals = Vec::new();
        let mut seasonal_plus_residual = Vec::new();
        for (i, r) in self.residual.iter().enumerate() {
            if let Some(r) = r {
                let s = self.seasonal_at(i);
                match self.mode {
                    DecompositionMode::Additive => {
                        residuals.push(*r);
                        seasonal_plus_residual.push(s + r);
                    }
                    DecompositionMode::Multiplicative => {
                        residuals.push(r - 1.0);
                        seasonal_plus_residual.push(s * r - 1.0);
                    }
                }
            }
        }
        let denom = variance(&seasonal_plus_residual);
        if denom < 1e-12 {
            return 0.0;
        }
        (1.0 - variance(&residuals) / denom).clamp(0.0, 1.0)
    }

    /// Defined trend points as `(index, value)`
    pub fn trend_points(&self) -> Vec<(f64, f64)> {
        self.trend
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|v| (i as f64, v)))
            .collect()
    }
}

/// Centred moving average of window `period`
pub fn centred_moving_average(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let half = period / 2;
    let mut out = vec![None; n];
    if period == 0 || n < period + 1 {
        return out;
    }
    for (t, slot) in out.iter_mut().enumerate().take(n - half).skip(half) {
        let value = if period % 2 == 0 {
            let inner: f64 = values[t - half + 1..t + half].iter().sum();
            (inner + 0.5 * values[t - half] + 0.5 * values[t + half]) / period as f64
        } else {
            values[t - half..=t + half].iter().sum::<f64>() / period as f64
        };
        *slot = Some(value);
    }
    out
}

pub fn decompose(values: &[f64], period: usize, mode: DecompositionMode) -> Result<Decomposition> {
    if period < 2 {
        return Err(PipelineError::fit("season length must be at least 2"));
    }
    if values.len() < 2 * period {
        return Err(PipelineError::fit(format!(
            "decomposition needs two full seasons ({} points), got {}",
            2 * period,
            values.len()
        )));
    }
    if mode == DecompositionMode::Multiplicative && values.iter().any(|v| *v <= 0.0) {
        return Err(PipelineError::fit(
            "multiplicative decomposition requires strictly positive values",
        ));
    }

    let trend = centred_moving_average(values, period);
    let mut by_phase: Vec<Vec<f64>> = vec![Vec::new(); period];
    for (i, (value, t)) in values.iter().zip(&trend).enumerate() {
        if let Some(t) = t {
            let detrended = match mode {
                DecompositionMode::Additive => value - t,
                DecompositionMode::Multiplicative => value / t,
            };
            by_phase[i % period].push(detrended);
        }
    }

    let neutral = match mode {
        DecompositionMode::Additive => 0.0,
        DecompositionMode::Multiplicative => 1.0,
    };
    let raw: Vec<f64> = by_phase
        .iter()
        .map(|v| if v.is_empty() { neutral } else { mean(v) })
        .collect();
    let level = mean(&raw);
    let seasonal: Vec<f64> = match mode {
        DecompositionMode::Additive => raw.iter().map(|s| s - level).collect(),
        DecompositionMode::Multiplicative => raw.iter().map(|s| s / level).collect(),
    };

    let residual = values
        .iter()
        .zip(&trend)
        .enumerate()
        .map(|(i, (value, t))| {
            t.map(|t| match mode {
                DecompositionMode::Additive => value - t - seasonal[i % period],
                DecompositionMode::Multiplicative => value / (t * seasonal[i % period]),
            })
        })
        .collect();

    Ok(Decomposition {
        mode,
        period,
        trend,
        seasonal,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_cycle(days: usize) -> Vec<f64> {
        (0..days * 24)
            .map(|h| {
                let phase = (h % 24) as f64 / 24.0 * std::f64::consts::TAU;
                100.0 + 0.1 * h as f64 + 20.0 * phase.sin()
            })
            .collect()
    }

    #[test]
    fn test_moving_average_of_line_is_line() {
        let values: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let ma = centred_moving_average(&values, 4);
        assert!(ma[0].is_none() && ma[1].is_none());
        assert!((ma[10].unwrap() - 10.0).abs() < 1e-12);
        assert!(ma[28].is_none());
    }

    #[test]
    fn test_additive_seasonal_sums_to_zero() {
        let d = decompose(&daily_cycle(4), 24, DecompositionMode::Additive).unwrap();
        assert_eq!(d.seasonal.len(), 24);
        assert!(d.seasonal.iter().sum::<f64>().abs() < 1e-9);
        // peak of the sine lands at phase 6
        let peak = d
            .seasonal
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, 6);
        assert!(d.seasonality_strength() > 0.9);
    }

    #[test]
    fn test_multiplicative_seasonal_means_one() {
        let d = decompose(&daily_cycle(3), 24, DecompositionMode::Multiplicative).unwrap();
        assert!((mean(&d.seasonal) - 1.0).abs() < 1e-9);
        assert!((d.recompose(30, 100.0) - 100.0 * d.seasonal_at(6)).abs() < 1e-9);
    }

    #[test]
    fn test_short_series_is_fit_error() {
        assert!(decompose(&[1.0; 30], 24, DecompositionMode::Additive).is_err());
        assert!(decompose(&[0.0; 48], 24, DecompositionMode::Multiplicative).is_err());
    }
}
