//! Hourly energy demand forecasting by seasonal decomposition
//!
//! The demand history is resampled to an hourly grid and decomposed into
//! trend, daily seasonal and residual parts. The forecast extends the trend
//! linearly, scales it by the projected population, re-applies the seasonal
//! profile and then adjusts for temperature and weekend days.

use chrono::{DateTime, Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::output::{ModelOutput, ModelResult, Reliability, GROWTH_POPULATION_PROJECTION};
use crate::error::{PipelineError, Result};
use crate::estimators::decompose::{decompose, Decomposition, DecompositionMode};
use crate::estimators::stats::{interpolate, mae, mean, ols_line, pearson, r_squared};
use crate::features::{keys, nearest_value, FeatureRecord};
use crate::models::{Horizon, ModelId, TimePoint};

const HOUR_SECS: i64 = 3600;
const HOURS_PER_DAY: usize = 24;
/// Relative daily trend change below which the trend counts as stable
const STABLE_TREND_SHARE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyParams {
    pub season_length: usize,
    pub mode: DecompositionMode,
    pub safety_margin: f64,
    /// Peak above which reserve capacity should be prepared (MW)
    pub reserve_alert_mw: f64,
    /// Absolute temperature correlation that triggers the pricing advice
    pub pricing_correlation: f64,
    /// Trailing hours of history resampled onto the hourly grid
    pub max_history_hours: usize,
}

impl Default for EnergyParams {
    fn default() -> Self {
        Self {
            season_length: 24,
            mode: DecompositionMode::Additive,
            safety_margin: 0.15,
            reserve_alert_mw: 1_500.0,
            pricing_correlation: 0.7,
            max_history_hours: 90 * HOURS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyEnergyForecast {
    pub date: String,
    pub peak_demand_mw: f64,
    pub peak_hour: u32,
    pub min_demand_mw: f64,
    pub reserve_capacity_mw: f64,
    pub daily_energy_mwh: f64,
    pub population_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMetrics {
    pub trend_direction: TrendDirection,
    pub trend_rate_mw_per_day: f64,
    pub temperature_sensitivity_mw_per_c: f64,
    pub temperature_correlation: f64,
    pub weekend_ratio: f64,
    pub seasonality_strength: f64,
    pub typical_peak_hour: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyForecast {
    pub daily: Vec<DailyEnergyForecast>,
    pub hourly: Vec<TimePoint>,
    pub patterns: PatternMetrics,
    pub recommendations: Vec<String>,
}

/// Hourly grid over at most the last `max_hours` hours of a sorted series,
/// gaps interpolated
fn hourly_grid(series: &[TimePoint], max_hours: usize) -> Vec<TimePoint> {
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Vec::new();
    };
    let mut start = first.timestamp.div_euclid(HOUR_SECS) * HOUR_SECS;
    let window = (max_hours.max(1) as i64 - 1).saturating_mul(HOUR_SECS);
    let earliest = last.timestamp.saturating_sub(window);
    if earliest > start {
        start += (earliest - start + HOUR_SECS - 1).div_euclid(HOUR_SECS) * HOUR_SECS;
    }
    // the last observation at or before `start` anchors the first grid point
    let from = series
        .partition_point(|p| p.timestamp <= start)
        .saturating_sub(1);
    let knots: Vec<(f64, f64)> = series[from..]
        .iter()
        .map(|p| (p.timestamp as f64, p.value))
        .collect();
    let mut grid = Vec::new();
    let mut ts = start;
    while ts <= last.timestamp {
        if let Some(value) = interpolate(&knots, ts as f64) {
            grid.push(TimePoint::new(ts, value));
        }
        ts += HOUR_SECS;
    }
    grid
}

fn is_weekend(ts: i64) -> bool {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| matches!(dt.weekday(), Weekday::Sat | Weekday::Sun))
        .unwrap_or(false)
}

fn hour_of_day(ts: i64) -> u32 {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.hour()).unwrap_or(0)
}

/// Population relative to its value at the end of the demand history.
/// Outside the projection the growth of the nearest segment is compounded.
struct PopulationScale {
    knots: Vec<(f64, f64)>,
    reference: f64,
    extrapolated: bool,
}

impl PopulationScale {
    fn new(projection: &[TimePoint], history_end: i64) -> Result<Self> {
        let knots: Vec<(f64, f64)> = projection
            .iter()
            .map(|p| (p.timestamp as f64, p.value))
            .collect();
        let (Some(first), Some(last)) = (projection.first(), projection.last()) else {
            return Err(PipelineError::malformed("upstream population projection is empty"));
        };
        let extrapolated = history_end < first.timestamp || history_end > last.timestamp;
        if extrapolated {
            warn!(
                history_end = history_end,
                projection_start = first.timestamp,
                projection_end = last.timestamp,
                "Demand history lies outside the population projection, extrapolating growth"
            );
        }
        let reference = population_at(&knots, history_end as f64).ok_or_else(|| {
            PipelineError::malformed("upstream population projection is empty")
        })?;
        Ok(Self {
            knots,
            reference,
            extrapolated,
        })
    }

    fn factor(&self, ts: i64) -> f64 {
        if self.reference <= 0.0 {
            return 1.0;
        }
        population_at(&self.knots, ts as f64)
            .map(|p| p / self.reference)
            .unwrap_or(1.0)
    }
}

fn population_at(knots: &[(f64, f64)], at: f64) -> Option<f64> {
    let n = knots.len();
    if n >= 2 {
        if at > knots[n - 1].0 {
            if let Some(p) = compound(knots[n - 2], knots[n - 1], knots[n - 1], at) {
                return Some(p);
            }
        } else if at < knots[0].0 {
            if let Some(p) = compound(knots[0], knots[1], knots[0], at) {
                return Some(p);
            }
        }
    }
    interpolate(knots, at)
}

/// Continues the growth of segment `(x0, y0)..(x1, y1)` from `anchor` to `at`
fn compound((x0, y0): (f64, f64), (x1, y1): (f64, f64), anchor: (f64, f64), at: f64) -> Option<f64> {
    if y0 <= 0.0 || y1 <= 0.0 || x1 <= x0 {
        return None;
    }
    let value = anchor.1 * (y1 / y0).powf((at - anchor.0) / (x1 - x0));
    value.is_finite().then_some(value)
}

/// Hourly effect of temperature on deseasonalized, detrended demand
#[derive(Debug, Clone, Copy, PartialEq)]
struct TemperatureEffect {
    slope: f64,
    reference: f64,
    correlation: f64,
}

impl TemperatureEffect {
    fn none() -> Self {
        Self {
            slope: 0.0,
            reference: 0.0,
            correlation: 0.0,
        }
    }

    fn fit(grid: &[TimePoint], detrended: &[f64], temperature: Option<&[TimePoint]>) -> Self {
        let Some(temperature) = temperature else {
            return Self::none();
        };
        let (temps, demand): (Vec<f64>, Vec<f64>) = grid
            .iter()
            .zip(detrended)
            .filter_map(|(p, d)| nearest_value(temperature, p.timestamp, HOUR_SECS).map(|t| (t, *d)))
            .unzip();
        if temps.len() < 3 {
            return Self::none();
        }
        match ols_line(&temps, &demand) {
            Some((slope, _)) => Self {
                slope,
                reference: mean(&temps),
                correlation: pearson(&temps, &demand),
            },
            None => Self::none(),
        }
    }

    fn adjustment(&self, temperature: Option<f64>) -> f64 {
        temperature
            .map(|t| self.slope * (t - self.reference))
            .unwrap_or(0.0)
    }
}

fn weekend_ratio(grid: &[TimePoint], deseasonalized: &[f64], day_types: Option<&[TimePoint]>) -> f64 {
    let mut weekday = Vec::new();
    let mut other = Vec::new();
    for (p, d) in grid.iter().zip(deseasonalized) {
        let code = day_types
            .and_then(|s| nearest_value(s, p.timestamp, HOUR_SECS / 2))
            .unwrap_or(if is_weekend(p.timestamp) { 1.0 } else { 0.0 });
        if code == 0.0 {
            weekday.push(*d);
        } else {
            other.push(*d);
        }
    }
    if weekday.is_empty() || other.is_empty() {
        return 1.0;
    }
    let base = mean(&weekday);
    if base.abs() < 1e-9 {
        1.0
    } else {
        mean(&other) / base
    }
}

fn recommendations(daily: &[DailyEnergyForecast], patterns: &PatternMetrics, params: &EnergyParams) -> Vec<String> {
    let mut out = Vec::new();
    let max_peak = daily
        .iter()
        .map(|d| d.peak_demand_mw)
        .fold(f64::NEG_INFINITY, f64::max);
    if max_peak > params.reserve_alert_mw {
        out.push("Prepare reserve capacity for peak demand periods".to_string());
    }
    if patterns.temperature_correlation.abs() > params.pricing_correlation {
        out.push("Implement dynamic pricing based on temperature forecasts".to_string());
    }
    out.push("Consider demand response programs during peak hours".to_string());
    out.push("Optimize renewable energy integration during low-demand periods".to_string());
    out
}

fn typical_peak_hour(grid: &[TimePoint], decomposition: &Decomposition) -> u32 {
    let phase = decomposition
        .seasonal
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    grid.get(phase).map(|p| hour_of_day(p.timestamp)).unwrap_or(0)
}

pub fn fit_and_forecast(record: &FeatureRecord, horizon: Horizon, params: &EnergyParams) -> Result<ModelResult> {
    let demand = record.require_series(keys::ENERGY_DEMAND)?;
    let projection = record
        .upstream_series(ModelId::UrbanGrowth, GROWTH_POPULATION_PROJECTION)
        .ok_or_else(|| {
            PipelineError::malformed("energy demand requires the upstream population projection")
        })?;
    let steps = horizon.steps() as usize;
    if steps == 0 {
        return Err(PipelineError::malformed("energy horizon must be at least one day"));
    }

    let grid = hourly_grid(demand, params.max_history_hours);
    let required = 2 * params.season_length;
    if grid.len() < required {
        return Err(PipelineError::insufficient("hourly energy observations", required, grid.len()));
    }
    let values: Vec<f64> = grid.iter().map(|p| p.value).collect();
    let decomposition = decompose(&values, params.season_length, params.mode)?;
    let (slope, intercept) = {
        let (x, y): (Vec<f64>, Vec<f64>) = decomposition.trend_points().into_iter().unzip();
        ols_line(&x, &y).ok_or_else(|| PipelineError::fit("trend line is undefined"))?
    };
    let trend_at = |index: usize| intercept + slope * index as f64;

    let deseasonalized: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, v)| decomposition.deseasonalize(i, *v))
        .collect();
    let detrended: Vec<f64> = deseasonalized
        .iter()
        .enumerate()
        .map(|(i, d)| d - trend_at(i))
        .collect();

    let history_temperature = record
        .series(keys::ENERGY_TEMPERATURE)
        .or_else(|| record.series(keys::WEATHER_TEMPERATURE));
    let temperature = TemperatureEffect::fit(&grid, &detrended, history_temperature);
    let forecast_temperature = record.series(keys::WEATHER_TEMPERATURE);
    let weekend = weekend_ratio(&grid, &deseasonalized, record.series(keys::ENERGY_DAY_TYPE));

    let Some(last) = grid.last() else {
        return Err(PipelineError::insufficient("hourly energy observations", required, 0));
    };
    let population = PopulationScale::new(projection, last.timestamp)?;

    let n = grid.len();
    let mut hourly = Vec::with_capacity(steps * HOURS_PER_DAY);
    let mut daily = Vec::with_capacity(steps);
    for day in 0..steps {
        let mut day_points = Vec::with_capacity(HOURS_PER_DAY);
        let mut day_factor = 1.0;
        for hour in 0..HOURS_PER_DAY {
            let k = day * HOURS_PER_DAY + hour + 1;
            let index = n - 1 + k;
            let ts = last.timestamp + k as i64 * HOUR_SECS;
            let factor = population.factor(ts);
            day_factor = factor;
            let mut value = decomposition.recompose(index, trend_at(index) * factor);
            value += temperature.adjustment(
                forecast_temperature.and_then(|s| nearest_value(s, ts, HOUR_SECS)),
            );
            if is_weekend(ts) {
                value *= weekend;
            }
            day_points.push(TimePoint::new(ts, value.max(0.0)));
        }

        let (peak_ts, peak) = day_points
            .iter()
            .map(|p| (p.timestamp, p.value))
            .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        let min_demand = day_points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
        let date = day_points
            .first()
            .and_then(|p| DateTime::from_timestamp(p.timestamp, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        daily.push(DailyEnergyForecast {
            date,
            peak_demand_mw: peak,
            peak_hour: hour_of_day(peak_ts),
            min_demand_mw: min_demand,
            reserve_capacity_mw: peak * (1.0 + params.safety_margin),
            daily_energy_mwh: day_points.iter().map(|p| p.value).sum(),
            population_factor: day_factor,
        });
        hourly.extend(day_points);
    }

    let fitted: Vec<f64> = (0..n).map(|i| decomposition.recompose(i, trend_at(i))).collect();
    let fit_r2 = r_squared(&values, &fitted);
    let level = mean(&values);
    let daily_rate = slope * HOURS_PER_DAY as f64;
    let trend_direction = if level.abs() > 0.0 && (daily_rate / level).abs() < STABLE_TREND_SHARE {
        TrendDirection::Stable
    } else if daily_rate > 0.0 {
        TrendDirection::Increasing
    } else if daily_rate < 0.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };
    let patterns = PatternMetrics {
        trend_direction,
        trend_rate_mw_per_day: daily_rate,
        temperature_sensitivity_mw_per_c: temperature.slope,
        temperature_correlation: temperature.correlation,
        weekend_ratio: weekend,
        seasonality_strength: decomposition.seasonality_strength(),
        typical_peak_hour: typical_peak_hour(&grid, &decomposition),
    };

    let reliability = Reliability {
        r_squared: Some(fit_r2),
        mae: Some(mae(&values, &fitted)),
        ..Default::default()
    }
    .with_extra("season_length", params.season_length as f64)
    .with_extra("hourly_points", n as f64)
    .with_extra(
        "population_extrapolated",
        if population.extrapolated { 1.0 } else { 0.0 },
    );

    let output = EnergyForecast {
        recommendations: recommendations(&daily, &patterns, params),
        daily,
        hourly,
        patterns,
    };
    Ok(ModelResult::new(
        ModelId::EnergyDemand,
        ModelOutput::EnergyDemand(output),
        reliability,
        fit_r2,
    ))
}
