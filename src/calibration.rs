//! Automatic gain/integration selection for a saturated sensor.
//!
//! When a reading overflows, the sampling loop asks [`AutoGainCalibrator`] for a
//! usable setting. The search is exhaustive and ordered: gains from lowest to highest,
//! and for each gain the integration times from longest to shortest. Each combination
//! is applied and a real reading is taken. The first one that produces a finite,
//! non-zero lux value is left active.
//!
//! If nothing works, the device is put back on the defaults (low gain, 600 ms) and the
//! search reports [`MeterError::SaturatedAllGains`]. Callers treat that as a warning and
//! keep sampling.

use std::sync::Arc;

use tracing::{debug, info, warn, Span};

use crate::error::{AppResult, MeterError};
use crate::hardware::{Gain, IntegrationTime, Tsl2591};
use crate::lux;

/// Setting restored when every combination fails.
pub const DEFAULT_SETTING: (Gain, IntegrationTime) = (Gain::Low, IntegrationTime::Ms600);

/// Outcome of a successful search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Gain left active on the device.
    pub gain: Gain,
    /// Integration time left active on the device.
    pub integration_time: IntegrationTime,
    /// Lux measured with that setting.
    pub lux: f64,
}

/// Searches the sensor's settings for one that is not saturated.
pub struct AutoGainCalibrator {
    device: Arc<Tsl2591>,
    span: Span,
}

impl AutoGainCalibrator {
    /// Calibrator for `device`, logging under a `calibration` span.
    pub fn new(device: Arc<Tsl2591>) -> Self {
        Self::with_span(device, tracing::info_span!("calibration"))
    }

    /// Calibrator with an injected logging span.
    pub fn with_span(device: Arc<Tsl2591>, span: Span) -> Self {
        Self { device, span }
    }

    /// Run the search.
    ///
    /// # Errors
    ///
    /// [`MeterError::SaturatedAllGains`] if no combination yields a usable reading; the
    /// device is then back on [`DEFAULT_SETTING`]. Any error restoring the defaults is
    /// returned instead.
    pub async fn calibrate(&self) -> AppResult<Calibration> {
        for gain in Gain::ASCENDING {
            if let Err(e) = self.device.set_gain(gain).await {
                debug!(parent: &self.span, %gain, error = %e, "failed to apply gain");
                continue;
            }
            for integration_time in IntegrationTime::DESCENDING {
                if let Err(e) = self.device.set_timing(integration_time).await {
                    debug!(parent: &self.span, %integration_time, error = %e, "failed to apply timing");
                    continue;
                }
                debug!(parent: &self.span, %gain, %integration_time, "Attempting");

                let reading = match self.device.read_channels().await {
                    Ok(reading) => reading,
                    Err(e) => {
                        debug!(parent: &self.span, error = %e, "read failed, skipping");
                        continue;
                    }
                };
                let lux = match lux::calculate(
                    reading.ch0,
                    reading.ch1,
                    reading.gain,
                    reading.integration_time,
                ) {
                    Ok(lux) if lux.is_finite() && lux != 0.0 => lux,
                    Ok(_) | Err(_) => continue,
                };

                info!(parent: &self.span, %gain, %integration_time, lux, "sensor recalibrated");
                return Ok(Calibration {
                    gain,
                    integration_time,
                    lux,
                });
            }
        }

        let (gain, integration_time) = DEFAULT_SETTING;
        self.device.set_gain(gain).await?;
        self.device.set_timing(integration_time).await?;
        warn!(parent: &self.span, "all gain options are saturated, restored defaults");
        Err(MeterError::SaturatedAllGains)
    }
}
