//! Sensor samples and their persisted form.
//!
//! A [`Sample`] is produced once per sampling tick and travels by value through the
//! bounded channel to the recorder. The recorder turns accepted samples into
//! [`SampleRecord`]s, the text row handed to storage.

pub mod record;
pub mod sample;

pub use record::{format_lux, format_scientific, SampleRecord};
pub use sample::{Sample, SampleKind};
