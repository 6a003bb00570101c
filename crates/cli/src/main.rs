//! Urban Forecast CLI
//!
//! Runs the multi-model forecasting pipeline over a payload file and
//! inspects the model registry.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{catalog, forecast};
use forecast_lib::{ModelId, ModelRegistry};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Urban Forecast CLI
#[derive(Parser)]
#[command(name = "urbanfc")]
#[command(author, version, about = "Urban multi-model forecasting pipeline", long_about = None)]
pub struct Cli {
    /// Pipeline config file (JSON, TOML or YAML)
    #[arg(long, short, env = "URBANFC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run forecasts for the given models
    Run {
        /// JSON file with one raw payload per domain
        #[arg(long, short)]
        payloads: PathBuf,

        /// Models to run (comma separated)
        #[arg(long, short, value_delimiter = ',', required = true)]
        models: Vec<ModelId>,

        /// Horizon override as MODEL=STEPS (repeatable)
        #[arg(long = "horizon", value_parser = forecast::parse_horizon)]
        horizons: Vec<(ModelId, u32)>,

        /// Print Prometheus metrics to stderr after the run
        #[arg(long)]
        metrics: bool,
    },

    /// List registered models
    Models,

    /// Show the execution batches for a set of models
    Plan {
        /// Models to plan (comma separated)
        #[arg(long, short, value_delimiter = ',', required = true)]
        models: Vec<ModelId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            payloads,
            models,
            horizons,
            metrics,
        } => {
            let config = config::load(cli.config.as_deref())?;
            forecast::run_forecast(config, &payloads, &models, &horizons, metrics, cli.format).await?;
        }
        Commands::Models => {
            catalog::list_models(&ModelRegistry::standard()?, cli.format)?;
        }
        Commands::Plan { models } => {
            catalog::show_plan(&ModelRegistry::standard()?, &models, cli.format)?;
        }
    }

    Ok(())
}
