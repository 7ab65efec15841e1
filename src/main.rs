//! `sunlight_meter` command-line entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sunlight_meter::config::{Settings, DEFAULT_CONFIG_PATH};
use sunlight_meter::data::summary::default_range;
use sunlight_meter::data::{summarize, CsvStore, SampleStore};
use sunlight_meter::{logging, SunlightMeter};

#[derive(Parser, Debug)]
#[command(name = "sunlight_meter", version, about = "TSL2591 sunlight meter")]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sampling job until Ctrl-C or expiry
    Record {
        /// Use the simulated sensor instead of the I2C bus
        #[arg(long)]
        mock: bool,
    },
    /// Probe the sensor and print its status
    Probe {
        /// Use the simulated sensor instead of the I2C bus
        #[arg(long)]
        mock: bool,
    },
    /// Print the most recent stored reading as JSON
    Latest,
    /// Print a light-condition summary as JSON (default: last 8 hours)
    Summary {
        /// Range start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Range end (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    logging::init(&settings.application)?;

    match cli.command {
        Command::Record { mock } => record(&settings, mock).await,
        Command::Probe { mock } => {
            let meter = SunlightMeter::from_settings(&settings, mock).await?;
            println!("{}", serde_json::to_string_pretty(&meter.status().await)?);
            meter.shutdown().await?;
            Ok(())
        }
        // Queries read the results file without initializing the store.
        Command::Latest => {
            let store = CsvStore::new(&settings.storage.results_path);
            let latest = store.latest().await?;
            println!("{}", serde_json::to_string_pretty(&latest)?);
            Ok(())
        }
        Command::Summary { start, end } => {
            let (default_start, default_end) = default_range(Utc::now());
            let (start, end) = (start.unwrap_or(default_start), end.unwrap_or(default_end));
            let store = CsvStore::new(&settings.storage.results_path);
            let rows = store.between(start, end).await?;
            println!("{}", serde_json::to_string_pretty(&summarize(&rows, start, end))?);
            Ok(())
        }
    }
}

async fn record(settings: &Settings, mock: bool) -> Result<()> {
    let meter = SunlightMeter::from_settings(settings, mock).await?;
    let job_id = meter.start_job().await?;
    info!(%job_id, "recording, press Ctrl-C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("interrupted, stopping job");
        }
        _ = meter.wait_for_job() => {
            info!("job finished");
        }
    }

    let stats = meter.shutdown().await?;
    info!(
        persisted = stats.persisted,
        dropped = stats.dropped,
        failed = stats.failed,
        "recording complete"
    );
    Ok(())
}
