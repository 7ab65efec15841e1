//! Text row persisted for each accepted sample.

use serde::{Deserialize, Serialize};

use super::Sample;
use crate::error::MeterError;

/// Significant digits kept for the normalized channel outputs.
pub const CHANNEL_SIGNIFICANT_DIGITS: usize = 5;

/// Row handed to storage: lux with 5 fractional digits, channel outputs in scientific
/// notation with 5 significant digits. The store adds its own timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct SampleRecord {
    pub job_id: String,
    pub lux: String,
    pub full_spectrum: String,
    pub visible: String,
    pub infrared: String,
}

impl TryFrom<&Sample> for SampleRecord {
    type Error = MeterError;

    fn try_from(sample: &Sample) -> Result<Self, Self::Error> {
        if !sample.lux.is_finite() {
            return Err(MeterError::NonFiniteSample(sample.lux));
        }
        Ok(Self {
            job_id: sample.job_id.clone(),
            lux: format_lux(sample.lux),
            full_spectrum: format_scientific(sample.full_spectrum, CHANNEL_SIGNIFICANT_DIGITS),
            visible: format_scientific(sample.visible, CHANNEL_SIGNIFICANT_DIGITS),
            infrared: format_scientific(sample.infrared, CHANNEL_SIGNIFICANT_DIGITS),
        })
    }
}

/// `12.345678` -> `"12.34568"`
pub fn format_lux(lux: f64) -> String {
    format!("{:.5}", lux)
}

/// Scientific notation with `significant` digits and a signed two-digit exponent,
/// e.g. `format_scientific(0.152590, 5) == "1.5259e-01"`.
pub fn format_scientific(value: f64, significant: usize) -> String {
    let rendered = format!("{:.*e}", significant.saturating_sub(1), value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => rendered,
        },
        None => rendered,
    }
}
