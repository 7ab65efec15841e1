//! Global `tracing` subscriber setup.
//!
//! Events go to stdout (plain or JSON) and, when configured, are duplicated to an
//! append-only log file without ANSI colors.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ApplicationConfig;

/// `RUST_LOG` if set, otherwise the configured level.
pub fn env_filter(config: &ApplicationConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log level '{}'", config.log_level)),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &ApplicationConfig) -> Result<()> {
    let stdout = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let file = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file at {:?}", path))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .with(env_filter(config)?)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(app = %config.name, level = %config.log_level, "logging initialized");
    Ok(())
}
