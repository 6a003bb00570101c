//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use forecast_lib::{
    EntryStatus, ForecastBundle, Horizon, ModelEntry, ModelId, ModelOutput,
};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format confidence as percentage
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.5 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Color status based on value
pub fn color_status(status: EntryStatus) -> String {
    let text = status.to_string();
    match status {
        EntryStatus::Ok => text.green().to_string(),
        EntryStatus::Skipped => text.yellow().to_string(),
        EntryStatus::Failed => text.red().to_string(),
    }
}

pub fn format_horizon(horizon: Horizon, bounds: Option<(u32, u32)>) -> String {
    match (horizon, bounds) {
        (Horizon::NotApplicable, _) | (_, None) => "-".to_string(),
        (h, Some((min, max))) => format!("{} ({}-{} {})", h, min, max, h.unit()),
    }
}

/// One-line headline of a model output
pub fn summarize(output: &ModelOutput) -> String {
    match output {
        ModelOutput::Traffic(f) => {
            let peak = f
                .predictions
                .iter()
                .map(|p| p.predicted_flow)
                .fold(0.0, f64::max);
            format!(
                "{} hourly predictions, peak {:.0} vph, flow ratio {:.2}",
                f.predictions.len(),
                peak,
                f.mean_flow_ratio
            )
        }
        ModelOutput::AirQuality(f) => format!(
            "{} daily predictions, current AQI {:.0}, order {}",
            f.predictions.len(),
            f.current_aqi,
            f.model_order
        ),
        ModelOutput::UrbanGrowth(f) => match f.projections.last() {
            Some(last) => format!(
                "{:.0} in {} ({:+.2}%/yr)",
                last.predicted_population,
                last.year,
                f.annual_growth_rate * 100.0
            ),
            None => format!("base population {:.0}", f.base_population),
        },
        ModelOutput::Transit(p) => format!(
            "{} proposed stops, {:.0}% demand served",
            p.stops.len(),
            p.route_efficiency
        ),
        ModelOutput::Crime(a) => format!(
            "{} hotspots, {} strategies",
            a.hotspots.len(),
            a.prevention_strategies.len()
        ),
        ModelOutput::EnergyDemand(f) => {
            let peak = f
                .daily
                .iter()
                .map(|d| d.peak_demand_mw)
                .fold(0.0, f64::max);
            format!("{} days, peak {:.0} MW", f.daily.len(), peak)
        }
        ModelOutput::LandUse(p) => format!(
            "{:.0} housing units target, {} conversions",
            p.housing_units_target,
            p.conversions.len()
        ),
    }
}

#[derive(Tabled, Serialize)]
struct EntryRow {
    #[tabled(rename = "MODEL")]
    model: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "CONFIDENCE")]
    confidence: String,
    #[tabled(rename = "DETAILS")]
    details: String,
    #[tabled(rename = "TIME")]
    time: String,
}

fn entry_row(model: ModelId, entry: &ModelEntry, supporting: bool) -> EntryRow {
    let details = match (&entry.result, &entry.reason) {
        (Some(output), _) => summarize(output),
        (None, Some(reason)) => match entry.reason_kind {
            Some(kind) => format!("{}: {}", kind, reason),
            None => reason.clone(),
        },
        (None, None) => String::new(),
    };
    let mut confidence = entry
        .confidence
        .map(color_confidence)
        .unwrap_or_else(|| "-".to_string());
    if entry.low_confidence {
        confidence.push_str(" (low)");
    }
    EntryRow {
        model: if supporting {
            format!("{} (supporting)", model)
        } else {
            model.to_string()
        },
        status: color_status(entry.status),
        confidence,
        details,
        time: if entry.cached {
            "cached".to_string()
        } else {
            format!("{}ms", entry.duration_ms)
        },
    }
}

/// Print a forecast bundle
pub fn print_bundle(bundle: &ForecastBundle, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(bundle) {
                println!("{}", json);
            }
        }
        OutputFormat::Table => {
            let rows: Vec<EntryRow> = bundle
                .models
                .iter()
                .map(|(id, e)| entry_row(*id, e, false))
                .chain(bundle.supporting.iter().map(|(id, e)| entry_row(*id, e, true)))
                .collect();
            print_table(&rows, format);

            let completeness = format!("{:.0}%", bundle.completeness * 100.0);
            match bundle.overall_confidence {
                Some(confidence) if bundle.completeness >= 1.0 => print_success(&format!(
                    "Completeness {}, overall confidence {}",
                    completeness,
                    format_confidence(confidence)
                )),
                Some(confidence) => print_warning(&format!(
                    "Completeness {}, overall confidence {}",
                    completeness,
                    format_confidence(confidence)
                )),
                None => print_warning(&format!("Completeness {}, no model succeeded", completeness)),
            }
            if let Some(generated) = chrono::DateTime::from_timestamp(bundle.generated_at, 0) {
                print_info(&format!("Generated at {}", generated.to_rfc3339()));
            }
        }
    }
}
