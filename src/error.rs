//! Custom error types for the application.
//!
//! This module defines the primary error type, `MeterError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different failures that can occur, from configuration issues to sensor
//! protocol problems.
//!
//! ## Error Hierarchy
//!
//! - **Lifecycle misuse** (`AlreadyRunning`, `NotRunning`) and **`DeviceAbsent`** are the
//!   only errors returned to callers of job start/stop.
//! - **In-loop conditions** (`ReadFailure`, `Overflow`, `SaturatedAllGains`,
//!   `NonFiniteSample`) are produced by the sensor stack and are logged or retried by the
//!   sampling loop and the recorder. They never abort a running job.
//! - **Ambient errors** (`Config`, `Configuration`, `Io`, `Storage`, `FeatureNotEnabled`)
//!   cover start-up and persistence.
//!
//! By using `#[from]`, `MeterError` can be created from underlying error types,
//! which keeps `?` usable throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MeterError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum MeterError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The sensor is not connected: {0}")]
    DeviceAbsent(String),

    #[error("Sensor must be enabled")]
    NotEnabled,

    #[error("A sampling job is already running")]
    AlreadyRunning,

    #[error("No sampling job is running")]
    NotRunning,

    #[error("Bus read failed: {0}")]
    ReadFailure(String),

    #[error("Bus write failed: {0}")]
    WriteFailure(String),

    #[error("Overflow: Channel 0: {ch0}, Channel 1: {ch1}")]
    Overflow { ch0: u16, ch1: u16 },

    #[error("All gain options are saturated")]
    SaturatedAllGains,

    #[error("Lux is not a finite number: {0}")]
    NonFiniteSample(f64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for MeterError {
    fn from(err: figment::Error) -> Self {
        MeterError::Config(Box::new(err))
    }
}
