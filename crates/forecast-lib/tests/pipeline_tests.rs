//! End-to-end pipeline tests

mod common;

use common::*;
use forecast_lib::algorithms::crime::CrimeAnalysis;
use forecast_lib::algorithms::energy::EnergyForecast;
use forecast_lib::algorithms::land_use::{HousingSource, LandUsePlan};
use forecast_lib::algorithms::traffic::TrafficForecast;
use forecast_lib::algorithms::transit::TransitPlan;
use forecast_lib::{
    Domain, EntryStatus, ForecastPipeline, ForecastRequest, ModelId, ModelOutput, ModelRegistry,
    PipelineConfig, RawPayloads, ReasonKind,
};
use std::collections::BTreeSet;

fn traffic_output(output: &ModelOutput) -> &TrafficForecast {
    match output {
        ModelOutput::Traffic(f) => f,
        other => panic!("expected traffic output, got {:?}", other),
    }
}

fn energy_output(output: &ModelOutput) -> &EnergyForecast {
    match output {
        ModelOutput::EnergyDemand(f) => f,
        other => panic!("expected energy output, got {:?}", other),
    }
}

fn crime_output(output: &ModelOutput) -> &CrimeAnalysis {
    match output {
        ModelOutput::Crime(a) => a,
        other => panic!("expected crime output, got {:?}", other),
    }
}

fn transit_output(output: &ModelOutput) -> &TransitPlan {
    match output {
        ModelOutput::Transit(p) => p,
        other => panic!("expected transit output, got {:?}", other),
    }
}

fn land_use_output(output: &ModelOutput) -> &LandUsePlan {
    match output {
        ModelOutput::LandUse(p) => p,
        other => panic!("expected land use output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_traffic_forecast_with_weather() {
    let pipeline = pipeline();
    let request = ForecastRequest::new([ModelId::Traffic], traffic_and_weather());
    let bundle = pipeline.run(request).await.unwrap();

    let entry = &bundle.models[&ModelId::Traffic];
    assert_eq!(entry.status, EntryStatus::Ok);
    let forecast = traffic_output(entry.result.as_ref().unwrap());
    assert_eq!(forecast.predictions.len(), 24);
    let max_flow = pipeline.config().params.traffic.max_flow_vph;
    for p in &forecast.predictions {
        assert!(p.predicted_flow >= 0.0 && p.predicted_flow <= max_flow);
    }
    let total: f64 = forecast.feature_importance.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert_eq!(bundle.completeness, 1.0);
    assert!(bundle.overall_confidence.is_some());
}

#[tokio::test]
async fn test_short_aqi_history_fails_without_running() {
    let pipeline = pipeline();
    let request = ForecastRequest::new(
        [ModelId::Aqi],
        RawPayloads::new().with(Domain::Aqi, aqi_payload(5)),
    );
    let bundle = pipeline.run(request).await.unwrap();

    let entry = &bundle.models[&ModelId::Aqi];
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.reason_kind, Some(ReasonKind::InsufficientHistoryError));
    assert_eq!(bundle.completeness, 0.0);
    assert!(bundle.overall_confidence.is_none());
    assert_eq!(pipeline.stats().executions, 0);
}

#[tokio::test]
async fn test_aqi_runs_with_traffic_chain() {
    let pipeline = pipeline();
    let payloads = traffic_and_weather().with(Domain::Aqi, aqi_payload(30));
    let request = ForecastRequest::new([ModelId::Traffic, ModelId::Aqi], payloads)
        .with_horizon(ModelId::Aqi, 3);
    let bundle = pipeline.run(request).await.unwrap();

    assert_eq!(bundle.completeness, 1.0);
    let json = serde_json::to_value(&bundle).unwrap();
    assert_eq!(json["models"]["aqi"]["status"], "ok");
    assert_eq!(json["models"]["aqi"]["result"]["predictions"].as_array().unwrap().len(), 3);
    assert!(json["models"]["aqi"]["result"]["traffic_adjustment"].is_number());
}

#[tokio::test]
async fn test_failed_growth_skips_energy() {
    let pipeline = pipeline();
    let short_demographics = serde_json::json!({
        "records": [
            { "year": 2023, "population": 1000.0, "built_area": 1.0, "gdp": 1.0, "employment_rate": 0.9 },
            { "year": 2024, "population": 1010.0, "built_area": 1.0, "gdp": 1.0, "employment_rate": 0.9 }
        ]
    });
    let payloads = RawPayloads::new()
        .with(Domain::Demographic, short_demographics)
        .with(Domain::Energy, energy_payload());
    let bundle = pipeline
        .run(ForecastRequest::new([ModelId::EnergyDemand], payloads))
        .await
        .unwrap();

    let energy = &bundle.models[&ModelId::EnergyDemand];
    assert_eq!(energy.status, EntryStatus::Skipped);
    assert_eq!(energy.reason_kind, Some(ReasonKind::UpstreamUnavailable));

    let growth = &bundle.supporting[&ModelId::UrbanGrowth];
    assert_eq!(growth.status, EntryStatus::Failed);
    assert_eq!(growth.reason_kind, Some(ReasonKind::InsufficientHistoryError));
    assert_eq!(bundle.completeness, 0.0);
    assert_eq!(pipeline.stats().skipped, 1);
}

#[tokio::test]
async fn test_energy_peak_grows_with_population() {
    let mut peaks = Vec::new();
    for share in [0.01, 0.03, 0.06] {
        let pipeline = pipeline();
        let payloads = RawPayloads::new()
            .with(Domain::Demographic, demographic_payload(share))
            .with(Domain::Energy, energy_payload());
        let request = ForecastRequest::new([ModelId::UrbanGrowth, ModelId::EnergyDemand], payloads);
        let bundle = pipeline.run(request).await.unwrap();
        assert_eq!(bundle.completeness, 1.0, "{:?}", bundle.models);
        let entry = &bundle.models[&ModelId::EnergyDemand];
        let forecast = energy_output(entry.result.as_ref().unwrap());
        peaks.push(forecast.daily.last().unwrap().peak_demand_mw);
    }
    assert!(peaks[0] < peaks[1] && peaks[1] < peaks[2], "{:?}", peaks);
}

#[tokio::test]
async fn test_warm_cache_rerun_is_identical_without_executions() {
    let pipeline = pipeline();
    let payloads = traffic_and_weather().with(Domain::Aqi, aqi_payload(30));
    let request = ForecastRequest::new([ModelId::Traffic, ModelId::Aqi], payloads);

    let cold = pipeline.run(request.clone()).await.unwrap();
    let executions = pipeline.stats().executions;
    assert_eq!(executions, 2);

    let warm = pipeline.run(request).await.unwrap();
    assert_eq!(pipeline.stats().executions, executions);
    assert_eq!(pipeline.stats().cache_hits, 2);
    assert!(cold.same_content(&warm));
    assert!(warm.models.values().all(|e| e.cached));
}

#[tokio::test]
async fn test_changed_params_miss_the_cache() {
    let pipeline = pipeline();
    let request = ForecastRequest::new([ModelId::Traffic], traffic_and_weather());
    pipeline.run(request.clone()).await.unwrap();
    pipeline
        .run(request.with_horizon(ModelId::Traffic, 12))
        .await
        .unwrap();
    assert_eq!(pipeline.stats().executions, 2);
    assert_eq!(pipeline.cache().len(), 2);
}

#[test]
fn test_resolve_order_respects_dependencies() {
    let registry = ModelRegistry::standard().unwrap();
    let requested: BTreeSet<ModelId> = [ModelId::EnergyDemand, ModelId::Aqi, ModelId::Traffic].into();
    let batches = registry.resolve_order(&requested).unwrap();

    let position = |id: ModelId| batches.iter().position(|b| b.contains(id)).unwrap();
    let planned: BTreeSet<ModelId> = batches.iter().flat_map(|b| b.models.iter().copied()).collect();
    assert_eq!(
        planned,
        [ModelId::EnergyDemand, ModelId::Aqi, ModelId::Traffic, ModelId::UrbanGrowth].into()
    );
    assert!(position(ModelId::UrbanGrowth) < position(ModelId::EnergyDemand));
    assert!(position(ModelId::Traffic) < position(ModelId::Aqi));
}

#[tokio::test]
async fn test_slow_model_times_out_without_affecting_siblings() {
    let mut config = PipelineConfig::default();
    config.params.traffic.n_trees = 20_000;
    config.node_timeout_base_ms = 50;
    config.node_timeout_per_step_ms = 0;
    config.node_timeout_max_ms = 50;
    let pipeline = ForecastPipeline::new(config).unwrap();

    let payloads = traffic_and_weather().with(Domain::Demographic, demographic_payload(0.02));
    let request = ForecastRequest::new([ModelId::Traffic, ModelId::UrbanGrowth], payloads);
    let bundle = pipeline.run(request).await.unwrap();

    let traffic = &bundle.models[&ModelId::Traffic];
    assert_eq!(traffic.status, EntryStatus::Failed);
    assert_eq!(traffic.reason_kind, Some(ReasonKind::TimeoutError));
    assert!(traffic.result.is_none());

    let growth = &bundle.models[&ModelId::UrbanGrowth];
    assert_eq!(growth.status, EntryStatus::Ok, "{:?}", growth.reason);
    assert_eq!(bundle.completeness, 0.5);
    assert_eq!(pipeline.stats().executions, 2);
    // only the successful growth result is cached
    assert_eq!(pipeline.cache().len(), 1);
}

#[tokio::test]
async fn test_crime_hotspots_end_to_end() {
    let pipeline = pipeline();
    let request = ForecastRequest::new(
        [ModelId::Crime],
        RawPayloads::new().with(Domain::Incident, incident_payload()),
    );
    let bundle = pipeline.run(request).await.unwrap();

    let entry = &bundle.models[&ModelId::Crime];
    assert_eq!(entry.status, EntryStatus::Ok, "{:?}", entry.reason);
    let analysis = crime_output(entry.result.as_ref().unwrap());
    assert_eq!(analysis.statistics.total_incidents, 60);
    assert_eq!(analysis.hotspots[0].incident_count, 20);
    assert_eq!(analysis.statistics.incidents_by_category["theft"], 14);
    // never cached
    assert!(pipeline.cache().is_empty());

    let json = serde_json::to_value(&bundle).unwrap();
    assert_eq!(json["models"]["crime"]["status"], "ok");
    assert!(!json["models"]["crime"]["result"]["hotspots"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_transit_uses_optional_growth_and_density() {
    let pipeline = pipeline();
    let payloads = RawPayloads::new()
        .with(Domain::Mobility, mobility_payload())
        .with(Domain::Demographic, demographic_payload_with_density(0.03, 8_000.0));

    let alone = pipeline
        .run(ForecastRequest::new([ModelId::Transit], payloads.clone()))
        .await
        .unwrap();
    assert!(alone.supporting.is_empty());
    let plain = transit_output(alone.models[&ModelId::Transit].result.as_ref().unwrap());
    assert_eq!(plain.growth_factor, 1.0);
    assert_eq!(plain.stops.len(), 3);
    assert_eq!(plain.coverage_gap.unclustered_points, 1);
    assert!(plain.served_population.is_some());

    let chained = pipeline
        .run(ForecastRequest::new([ModelId::Transit, ModelId::UrbanGrowth], payloads))
        .await
        .unwrap();
    assert_eq!(chained.completeness, 1.0);
    let plan = transit_output(chained.models[&ModelId::Transit].result.as_ref().unwrap());
    assert!(plan.growth_factor > 1.0, "{}", plan.growth_factor);

    let json = serde_json::to_value(&chained).unwrap();
    assert_eq!(json["models"]["transit"]["result"]["stops"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_land_use_pulls_in_growth_as_supporting() {
    let pipeline = pipeline();
    let payloads = RawPayloads::new()
        .with(Domain::Parcel, parcel_payload())
        .with(Domain::Demographic, demographic_payload(0.03));
    let bundle = pipeline
        .run(ForecastRequest::new([ModelId::LandUse], payloads))
        .await
        .unwrap();

    assert_eq!(bundle.completeness, 1.0);
    assert_eq!(bundle.count(), 1);
    assert_eq!(bundle.supporting[&ModelId::UrbanGrowth].status, EntryStatus::Ok);

    let entry = &bundle.models[&ModelId::LandUse];
    assert_eq!(entry.status, EntryStatus::Ok, "{:?}", entry.reason);
    let plan = land_use_output(entry.result.as_ref().unwrap());
    assert_eq!(plan.housing_source, HousingSource::Upstream);
    assert!(plan.housing_units_target > 0.0);
    assert_eq!(plan.clusters.iter().map(|c| c.parcels).sum::<usize>(), 24);

    let json = serde_json::to_value(&bundle).unwrap();
    assert_eq!(json["supporting"]["urban_growth"]["status"], "ok");
    assert_eq!(json["models"]["land_use"]["result"]["housing_source"], "upstream");
}
