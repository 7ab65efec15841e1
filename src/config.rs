//! Configuration loaded with Figment.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. A TOML file (`config/sunlight.toml` unless another path is given)
//! 3. Environment variables prefixed with `SUNLIGHT_`, using `__` between sections
//!
//! ```text
//! SUNLIGHT_APPLICATION__LOG_LEVEL=debug
//! SUNLIGHT_JOB__RECORD_INTERVAL=10s
//! SUNLIGHT_SENSOR__GAIN=med
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, MeterError};
use crate::hardware::tsl2591::I2C_ADDRESS;
use crate::hardware::{Gain, IntegrationTime};
use crate::job::{JobSettings, DEFAULT_MAX_DURATION, DEFAULT_RECORD_INTERVAL};

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/sunlight.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SUNLIGHT_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Process-wide settings
    pub application: ApplicationConfig,
    /// Sensor bus and initial gain/timing
    pub sensor: SensorConfig,
    /// Sampling job timing
    pub job: JobConfig,
    /// Result storage
    pub storage: StorageConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name used in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error); `RUST_LOG` wins if set
    pub log_level: String,
    /// Append-only log file; `None` logs to stdout only
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Emit JSON lines on stdout instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Sunlight Meter".to_string(),
            log_level: "info".to_string(),
            log_file: Some(PathBuf::from("slm.log")),
            json_logs: false,
        }
    }
}

/// Sensor bus and initial acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// I2C character device, e.g. `/dev/i2c-1`
    pub i2c_path: PathBuf,
    /// 7-bit bus address
    pub address: u8,
    /// Gain applied at probe time (low, med, high, max)
    pub gain: Gain,
    /// Integration time applied at probe time, in milliseconds (100..=600)
    pub integration_time_ms: IntegrationTime,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_path: PathBuf::from("/dev/i2c-1"),
            address: I2C_ADDRESS,
            gain: Gain::default(),
            integration_time_ms: IntegrationTime::default(),
        }
    }
}

/// Sampling job timing and queue size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Hard limit on a job's lifetime, e.g. `"8h"`
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    /// Time between samples, e.g. `"30s"`
    #[serde(with = "humantime_serde")]
    pub record_interval: Duration,
    /// Bounded queue size between the sampler and the recorder
    pub channel_capacity: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            record_interval: DEFAULT_RECORD_INTERVAL,
            channel_capacity: 64,
        }
    }
}

impl JobConfig {
    /// Timing parameters for [`crate::job::SamplingJob`].
    pub fn settings(&self) -> JobSettings {
        JobSettings {
            max_duration: self.max_duration,
            record_interval: self.record_interval,
        }
    }
}

/// Result storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// CSV file receiving one row per accepted sample
    pub results_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_path: PathBuf::from("data/sunlight.csv"),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] (if present) and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// `Config` if a source cannot be parsed, `Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider stack, exposed for inspection.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(MeterError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sensor.address > 0x7F {
            return Err(MeterError::Configuration(format!(
                "Invalid sensor address {:#04x}. Must be a 7-bit address",
                self.sensor.address
            )));
        }

        if self.job.max_duration.is_zero() || self.job.record_interval.is_zero() {
            return Err(MeterError::Configuration(
                "max_duration and record_interval must be greater than zero".to_string(),
            ));
        }
        if self.job.record_interval > self.job.max_duration {
            return Err(MeterError::Configuration(format!(
                "record_interval ({}) exceeds max_duration ({})",
                humantime_serde::re::humantime::format_duration(self.job.record_interval),
                humantime_serde::re::humantime::format_duration(self.job.max_duration)
            )));
        }
        if self.job.channel_capacity == 0 {
            return Err(MeterError::Configuration(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.job.max_duration, Duration::from_secs(8 * 3600));
        assert_eq!(settings.job.record_interval, Duration::from_secs(30));
        assert_eq!(settings.sensor.address, 0x29);
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sunlight.toml",
                r#"
                [application]
                name = "Garden"
                log_level = "debug"

                [sensor]
                gain = "med"
                integration_time_ms = 200

                [job]
                max_duration = "2h"
                record_interval = "1m"
                channel_capacity = 16
                "#,
            )?;
            jail.set_env("SUNLIGHT_JOB__RECORD_INTERVAL", "10s");

            let settings = Settings::load_from("sunlight.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.application.name, "Garden");
            assert_eq!(settings.sensor.gain, Gain::Med);
            assert_eq!(settings.sensor.integration_time_ms, IntegrationTime::Ms200);
            assert_eq!(settings.job.max_duration, Duration::from_secs(7200));
            assert_eq!(settings.job.record_interval, Duration::from_secs(10));
            assert_eq!(settings.job.channel_capacity, 16);
            // Untouched sections keep their defaults.
            assert_eq!(settings.storage, StorageConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_integration_time() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[sensor]\nintegration_time_ms = 250\n")?;
            assert!(matches!(
                Settings::load_from("bad.toml"),
                Err(MeterError::Config(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_validation_errors() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(matches!(settings.validate(), Err(MeterError::Configuration(_))));

        let mut settings = Settings::default();
        settings.job.record_interval = Duration::from_secs(9 * 3600);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.job.channel_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sensor.address = 0x80;
        assert!(settings.validate().is_err());
    }
}
