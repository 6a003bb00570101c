//! Registry inspection commands

use anyhow::Result;
use colored::Colorize;
use forecast_lib::{ModelId, ModelRegistry};
use serde::Serialize;
use std::collections::BTreeSet;
use tabled::Tabled;

use crate::output::{format_horizon, print_info, print_table, OutputFormat};

/// Row for the model catalog table
#[derive(Tabled, Serialize)]
struct ModelRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ALGORITHM")]
    algorithm: String,
    #[tabled(rename = "INPUTS")]
    inputs: String,
    #[tabled(rename = "UPSTREAM")]
    upstream: String,
    #[tabled(rename = "HORIZON")]
    horizon: String,
    #[tabled(rename = "CACHE TTL")]
    cache_ttl: String,
}

/// Row for the execution plan table
#[derive(Tabled, Serialize)]
struct PlanRow {
    #[tabled(rename = "BATCH")]
    batch: usize,
    #[tabled(rename = "MODEL")]
    model: String,
    #[tabled(rename = "REASON")]
    reason: String,
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    let joined: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}

/// List every registered model
pub fn list_models(registry: &ModelRegistry, format: OutputFormat) -> Result<()> {
    let rows: Vec<ModelRow> = registry
        .iter()
        .map(|d| ModelRow {
            id: d.id.to_string(),
            name: d.display_name.to_string(),
            algorithm: d.algorithm.to_string(),
            inputs: join(
                d.required_domains
                    .iter()
                    .map(|dom| dom.to_string())
                    .chain(d.optional_domains.iter().map(|dom| format!("{}?", dom))),
            ),
            upstream: join(d.upstream.iter().map(|u| {
                if u.required {
                    u.id.to_string()
                } else {
                    format!("{}?", u.id)
                }
            })),
            horizon: format_horizon(d.default_horizon, d.horizon_bounds),
            cache_ttl: d
                .cache_ttl
                .map(|ttl| format!("{}s", ttl.as_secs()))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_table(&rows, format);
    if matches!(format, OutputFormat::Table) {
        print_info("`?` marks optional inputs and upstreams");
    }
    Ok(())
}

/// Show the batches a request would execute in
pub fn show_plan(registry: &ModelRegistry, models: &[ModelId], format: OutputFormat) -> Result<()> {
    let requested: BTreeSet<ModelId> = models.iter().copied().collect();
    let batches = registry.resolve_order(&requested)?;

    let rows: Vec<PlanRow> = batches
        .iter()
        .enumerate()
        .flat_map(|(index, batch)| {
            let requested = &requested;
            batch.models.iter().map(move |id| PlanRow {
                batch: index + 1,
                model: id.to_string(),
                reason: if requested.contains(id) {
                    "requested".to_string()
                } else {
                    "required upstream".to_string()
                },
            })
        })
        .collect();

    if matches!(format, OutputFormat::Table) {
        println!("{}", "Execution Plan".bold());
    }
    print_table(&rows, format);
    Ok(())
}
