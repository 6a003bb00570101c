//! Configuration loading for the CLI
//!
//! Sources, lowest precedence first:
//! - built-in defaults of [`PipelineConfig`]
//! - an optional config file (format from its extension)
//! - `URBANFC_`-prefixed environment variables, `__` between nested keys
//!   (`URBANFC_CACHE__ENABLED=false`, `URBANFC_PARAMS__SEED=7`)

use anyhow::{Context, Result};
use forecast_lib::PipelineConfig;
use std::path::Path;

pub const ENV_PREFIX: &str = "URBANFC";

/// Load and validate the pipeline configuration
pub fn load(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut builder = ::config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(::config::File::from(path).required(true));
    }
    builder = builder.add_source(
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config: PipelineConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to parse configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
