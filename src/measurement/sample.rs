//! One tick's worth of sensor output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lux::{normalized, Spectrum};

/// Whether a sample carries a real reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Channels were read and lux computed.
    Reading,
    /// The bus read failed; every numeric field is zero.
    ReadFailure,
}

/// A single reading emitted by a sampling job.
///
/// # Fields
///
/// * `job_id` - Job that produced the sample
/// * `sequence` - Position within the job, starting at 0
/// * `captured_at` - UTC time the tick completed
/// * `ch0` / `ch1` - Raw full-spectrum and infrared counts
/// * `lux` - Calibrated illuminance
/// * `visible` / `infrared` / `full_spectrum` - Channel outputs normalized to 0..1
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Sample {
    pub job_id: String,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub kind: SampleKind,
    pub ch0: u16,
    pub ch1: u16,
    pub lux: f64,
    pub visible: f64,
    pub infrared: f64,
    pub full_spectrum: f64,
}

impl Sample {
    /// A fully populated sample from a successful read.
    pub fn from_reading(job_id: &str, sequence: u64, ch0: u16, ch1: u16, lux: f64) -> Self {
        Self {
            job_id: job_id.to_string(),
            sequence,
            captured_at: Utc::now(),
            kind: SampleKind::Reading,
            ch0,
            ch1,
            lux,
            visible: normalized(Spectrum::Visible, ch0, ch1),
            infrared: normalized(Spectrum::Infrared, ch0, ch1),
            full_spectrum: normalized(Spectrum::FullSpectrum, ch0, ch1),
        }
    }

    /// The zero-valued placeholder emitted when a read fails.
    pub fn read_failure(job_id: &str, sequence: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            sequence,
            captured_at: Utc::now(),
            kind: SampleKind::ReadFailure,
            ch0: 0,
            ch1: 0,
            lux: 0.0,
            visible: 0.0,
            infrared: 0.0,
            full_spectrum: 0.0,
        }
    }

    /// True for read-failure placeholders.
    pub fn is_read_failure(&self) -> bool {
        self.kind == SampleKind::ReadFailure
    }
}
