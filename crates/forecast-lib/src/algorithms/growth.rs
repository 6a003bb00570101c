//! Population growth projection with ridge regression
//!
//! Population is regressed on elapsed years, built area, GDP and the
//! employment rate. Projections grow built area and GDP at their historical
//! compound annual rates and hold employment at its last value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::output::{ModelOutput, ModelResult, Reliability};
use crate::error::{PipelineError, Result};
use crate::estimators::ridge::{select_alpha, RidgeModel};
use crate::estimators::stats::compound_growth_rate;
use crate::features::{fractional_year, keys, year_start, FeatureRecord};
use crate::models::{Horizon, ModelId, TimePoint};

pub const COEFFICIENT_NAMES: [&str; 4] = [
    "year_impact",
    "built_area_impact",
    "gdp_impact",
    "employment_impact",
];

const PERSONS_PER_SCHOOL: f64 = 5_000.0;
const PERSONS_PER_HOSPITAL: f64 = 50_000.0;
const PERSONS_PER_PARK: f64 = 10_000.0;
const WATER_LITRES_PER_PERSON_DAY: f64 = 150.0;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthParams {
    pub alpha_candidates: Vec<f64>,
}

impl Default for GrowthParams {
    fn default() -> Self {
        Self {
            alpha_candidates: vec![0.01, 0.1, 1.0, 10.0, 100.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InfrastructureNeeds {
    pub schools_needed: u64,
    pub hospitals_needed: u64,
    pub parks_needed: u64,
    pub water_capacity_mld: f64,
}

impl InfrastructureNeeds {
    pub fn for_population(population: f64) -> Self {
        let population = population.max(0.0);
        Self {
            schools_needed: (population / PERSONS_PER_SCHOOL) as u64,
            hospitals_needed: (population / PERSONS_PER_HOSPITAL) as u64,
            parks_needed: (population / PERSONS_PER_PARK) as u64,
            water_capacity_mld: population * WATER_LITRES_PER_PERSON_DAY / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyProjection {
    pub year: i32,
    pub predicted_population: f64,
    pub lower: f64,
    pub upper: f64,
    /// Percent change against the base year
    pub growth_rate: f64,
    pub infrastructure_needs: InfrastructureNeeds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthForecast {
    pub base_year: i32,
    pub base_population: f64,
    pub projections: Vec<YearlyProjection>,
    /// Coefficients in original units
    pub coefficients: BTreeMap<String, f64>,
    /// Base year plus every projected year, stamped at 1 January UTC
    #[serde(skip)]
    pub population_projection: Vec<TimePoint>,
    pub annual_growth_rate: f64,
    /// Final projection over base population
    pub population_growth_factor: f64,
}

fn year_of(ts: i64) -> i32 {
    fractional_year(ts).floor() as i32
}

fn values(series: &[TimePoint]) -> Vec<f64> {
    series.iter().map(|p| p.value).collect()
}

pub fn fit_and_forecast(record: &FeatureRecord, horizon: Horizon, params: &GrowthParams) -> Result<ModelResult> {
    let population = record.require_series(keys::DEMOGRAPHIC_POPULATION)?;
    let built_area = values(record.require_series(keys::DEMOGRAPHIC_BUILT_AREA)?);
    let gdp = values(record.require_series(keys::DEMOGRAPHIC_GDP)?);
    let employment = values(record.require_series(keys::DEMOGRAPHIC_EMPLOYMENT)?);
    let n = population.len();
    if [built_area.len(), gdp.len(), employment.len()].iter().any(|len| *len != n) {
        return Err(PipelineError::malformed(
            "demographic series must cover the same years",
        ));
    }
    if n < 3 {
        return Err(PipelineError::insufficient("demographic records", 3, n));
    }
    let steps = horizon.steps();
    if steps == 0 {
        return Err(PipelineError::malformed("growth horizon must be at least one year"));
    }

    let years: Vec<i32> = population.iter().map(|p| year_of(p.timestamp)).collect();
    let first_year = years[0];
    let base_year = years[n - 1];
    let span = f64::from(base_year - first_year);

    let x: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            vec![
                f64::from(years[i] - first_year),
                built_area[i],
                gdp[i],
                employment[i],
            ]
        })
        .collect();
    let y = values(population);

    let (alpha, loo_mse) = select_alpha(&x, &y, &params.alpha_candidates)?;
    let model = RidgeModel::fit(&x, &y, alpha)?;
    let (r2, rmse) = model.training_fit(&x, &y);

    let area_rate = compound_growth_rate(built_area[0], built_area[n - 1], span);
    let gdp_rate = compound_growth_rate(gdp[0], gdp[n - 1], span);
    let base_population = y[n - 1];

    let mut projections = Vec::with_capacity(steps as usize);
    let mut population_projection = vec![TimePoint::new(population[n - 1].timestamp, base_population)];
    for h in 1..=steps {
        let year = base_year + h as i32;
        let growth = |rate: f64, last: f64| last * (1.0 + rate).powi(h as i32);
        let row = [
            f64::from(year - first_year),
            growth(area_rate, built_area[n - 1]),
            growth(gdp_rate, gdp[n - 1]),
            employment[n - 1],
        ];
        let predicted = model.predict(&row).round().max(0.0);
        let half_width = Z_95 * rmse * (1.0 + f64::from(h) / n as f64).sqrt();
        let growth_rate = if base_population > 0.0 {
            (predicted - base_population) / base_population * 100.0
        } else {
            0.0
        };
        projections.push(YearlyProjection {
            year,
            predicted_population: predicted,
            lower: (predicted - half_width).max(0.0),
            upper: predicted + half_width,
            growth_rate,
            infrastructure_needs: InfrastructureNeeds::for_population(predicted),
        });
        population_projection.push(TimePoint::new(year_start(year)?, predicted));
    }

    let final_population = projections
        .last()
        .map(|p| p.predicted_population)
        .unwrap_or(base_population);
    let population_growth_factor = if base_population > 0.0 {
        final_population / base_population
    } else {
        1.0
    };
    let annual_growth_rate = compound_growth_rate(base_population, final_population, f64::from(steps));

    let coefficients = COEFFICIENT_NAMES
        .iter()
        .zip(model.coefficients())
        .map(|(name, c)| (name.to_string(), c))
        .collect();

    let reliability = Reliability {
        r_squared: Some(r2),
        rmse: Some(rmse),
        confidence_interval: Some(Z_95 * rmse * (1.0 + f64::from(steps) / n as f64).sqrt()),
        ..Default::default()
    }
    .with_extra("alpha", alpha)
    .with_extra("loo_mse", loo_mse)
    .with_extra("intercept", model.intercept());

    let output = GrowthForecast {
        base_year,
        base_population,
        projections,
        coefficients,
        population_projection,
        annual_growth_rate,
        population_growth_factor,
    };
    Ok(ModelResult::new(
        ModelId::UrbanGrowth,
        ModelOutput::UrbanGrowth(output),
        reliability,
        r2,
    ))
}
