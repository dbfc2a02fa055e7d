//! `tracing` subscriber setup for embedders that don't install their own.

use crate::config::LogConfig;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Build the env filter: `RUST_LOG` when set, else the configured directive.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    EnvFilter::try_new(&config.filter)
        .with_context(|| format!("Invalid log filter '{}'", config.filter))
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
