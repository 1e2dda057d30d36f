//! Configuration loading
//!
//! A YAML/TOML/JSON file (optional) layered under `PRICEWATCH__*`
//! environment variables, e.g. `PRICEWATCH__CHANNEL_CAPACITY=4096` or
//! `PRICEWATCH__RENDER__ENABLED=false`.

use std::env;

use config::{Config, Environment, File};
use tracing::info;

use pricewatch_core::AppConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "PRICEWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Resolve the config path: explicit argument, then `PRICEWATCH_CONFIG`,
/// then `config.yml` in the working directory.
pub fn config_path(explicit: Option<String>) -> String {
    explicit
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

fn environment() -> Environment {
    Environment::with_prefix("PRICEWATCH")
        .separator("__")
        .try_parsing(true)
}

/// Load and validate the application config.
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    load_layered(path, environment())
}

fn load_layered(path: &str, env: Environment) -> anyhow::Result<AppConfig> {
    info!("Loading configuration from {}", path);

    let settings = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(env)
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.validate()?;

    info!(
        "Configured {} chain sources, {} ticker sources",
        config.chains.len(),
        config.tickers.len()
    );

    Ok(config)
}
