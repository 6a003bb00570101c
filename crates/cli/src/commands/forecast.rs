//! Forecast execution command

use anyhow::{Context, Result};
use forecast_lib::{ForecastPipeline, ForecastRequest, ModelId, PipelineConfig, RawPayloads};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::output::{print_bundle, OutputFormat};

/// Parse a `model=steps` horizon override
pub fn parse_horizon(raw: &str) -> std::result::Result<(ModelId, u32), String> {
    let (model, steps) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MODEL=STEPS, got '{}'", raw))?;
    let model: ModelId = model.parse().map_err(|e| format!("{}", e))?;
    let steps: u32 = steps
        .trim()
        .parse()
        .map_err(|_| format!("invalid horizon steps '{}'", steps))?;
    Ok((model, steps))
}

/// Read a payload file: one JSON object keyed by domain
pub fn read_payloads(path: &Path) -> Result<RawPayloads> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse payload file {}", path.display()))
}

/// Run the pipeline and print the bundle
pub async fn run_forecast(
    config: PipelineConfig,
    payloads_path: &Path,
    models: &[ModelId],
    horizons: &[(ModelId, u32)],
    show_metrics: bool,
    format: OutputFormat,
) -> Result<()> {
    let payloads = read_payloads(payloads_path)?;
    let pipeline = ForecastPipeline::new(config).context("Failed to build pipeline")?;

    let request = ForecastRequest {
        models: models.iter().copied().collect(),
        payloads,
        horizons: horizons.iter().copied().collect::<BTreeMap<_, _>>(),
    };
    let bundle = pipeline.run(request).await.context("Forecast request rejected")?;

    let stats = pipeline.stats();
    info!(
        event = "forecast_finished",
        executions = stats.executions,
        cache_hits = stats.cache_hits,
        completeness = bundle.completeness,
        "Forecast finished"
    );

    print_bundle(&bundle, format);
    if show_metrics {
        eprint!("{}", pipeline.metrics().render());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_horizon() {
        assert_eq!(parse_horizon("traffic=12").unwrap(), (ModelId::Traffic, 12));
        assert_eq!(
            parse_horizon("Energy-Demand= 3").unwrap(),
            (ModelId::EnergyDemand, 3)
        );
        assert!(parse_horizon("traffic").is_err());
        assert!(parse_horizon("weather=3").is_err());
        assert!(parse_horizon("aqi=soon").is_err());
    }
}
