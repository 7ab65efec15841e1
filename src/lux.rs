//! Illuminance calculation from raw TSL2591 channel counts.
//!
//! Everything here is pure: same inputs, same output.
//!
//! ```text
//! counts_per_lux = (integration_ms * gain_multiplier) / 408.0
//! lux            = (ch0 - ch1) * (1 - ch1 / ch0) / counts_per_lux
//! ```
//!
//! A reading of `0xFFFF` on either channel means the ADC saturated and the value is
//! unusable; [`calculate`] reports that as [`MeterError::Overflow`] so the caller can
//! recalibrate.

use crate::error::MeterError;
use crate::hardware::tsl2591::CHANNEL_MAX;
use crate::hardware::{Gain, IntegrationTime};

/// Device factor from the TSL2591 datasheet.
pub const LUX_DF: f64 = 408.0;

/// Which portion of the spectrum to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spectrum {
    /// Channel 0 minus channel 1.
    Visible,
    /// Channel 1.
    Infrared,
    /// Channel 0.
    FullSpectrum,
}

/// Convert a pair of channel counts to lux.
///
/// A dark reading (`ch0 == 0`) yields `0.0` rather than dividing by zero.
///
/// # Errors
///
/// [`MeterError::Overflow`] iff `ch0` or `ch1` is `0xFFFF`.
pub fn calculate(
    ch0: u16,
    ch1: u16,
    gain: Gain,
    integration_time: IntegrationTime,
) -> Result<f64, MeterError> {
    if ch0 == CHANNEL_MAX || ch1 == CHANNEL_MAX {
        return Err(MeterError::Overflow { ch0, ch1 });
    }
    if ch0 == 0 {
        return Ok(0.0);
    }

    let counts_per_lux = (integration_time.millis() as f64 * gain.multiplier()) / LUX_DF;
    let (ch0, ch1) = (f64::from(ch0), f64::from(ch1));
    Ok((ch0 - ch1) * (1.0 - ch1 / ch0) / counts_per_lux)
}

/// Channel output normalized to `0.0..=1.0` of the ADC range.
pub fn normalized(spectrum: Spectrum, ch0: u16, ch1: u16) -> f64 {
    let counts = match spectrum {
        Spectrum::Visible => (f64::from(ch0) - f64::from(ch1)).max(0.0),
        Spectrum::Infrared => f64::from(ch1),
        Spectrum::FullSpectrum => f64::from(ch0),
    };
    counts / f64::from(CHANNEL_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_reading() {
        let lux = calculate(10000, 2000, Gain::Low, IntegrationTime::Ms300).unwrap();
        assert!((lux - 8704.0).abs() < 1e-6, "lux = {lux}");
    }

    #[test]
    fn test_overflow_on_either_channel() {
        assert!(matches!(
            calculate(0xFFFF, 100, Gain::Low, IntegrationTime::Ms300),
            Err(MeterError::Overflow { ch0: 0xFFFF, ch1: 100 })
        ));
        assert!(calculate(100, 0xFFFF, Gain::Max, IntegrationTime::Ms100).is_err());
        assert!(calculate(0xFFFE, 0xFFFE, Gain::Low, IntegrationTime::Ms100).is_ok());
    }

    #[test]
    fn test_calculation_is_deterministic() {
        let first = calculate(4321, 1234, Gain::High, IntegrationTime::Ms500).unwrap();
        for _ in 0..10 {
            let again = calculate(4321, 1234, Gain::High, IntegrationTime::Ms500).unwrap();
            assert_eq!(first.to_bits(), again.to_bits());
        }
    }

    #[test]
    fn test_dark_reading_is_zero_lux() {
        assert_eq!(calculate(0, 0, Gain::Low, IntegrationTime::Ms300).unwrap(), 0.0);
        assert_eq!(calculate(0, 5, Gain::Med, IntegrationTime::Ms300).unwrap(), 0.0);
    }

    #[test]
    fn test_gain_and_time_scale_result() {
        let low = calculate(10000, 2000, Gain::Low, IntegrationTime::Ms100).unwrap();
        let med = calculate(10000, 2000, Gain::Med, IntegrationTime::Ms100).unwrap();
        let long = calculate(10000, 2000, Gain::Low, IntegrationTime::Ms200).unwrap();
        assert!((low / med - 25.0).abs() < 1e-9);
        assert!((low / long - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_outputs() {
        assert_eq!(normalized(Spectrum::FullSpectrum, 0xFFFF, 0), 1.0);
        assert_eq!(normalized(Spectrum::Infrared, 0, 0), 0.0);
        assert_eq!(normalized(Spectrum::Visible, 100, 300), 0.0);
        let visible = normalized(Spectrum::Visible, 30000, 10000);
        assert!((visible - 20000.0 / 65535.0).abs() < 1e-12);
    }
}
