//! Core library for the sunlight meter.
//!
//! This library turns raw TSL2591 channel counts into calibrated lux, runs timed
//! sampling jobs and persists each reading exactly once, in order. It is used by the
//! `sunlight_meter` binary and by anything embedding the pipeline directly.
//!
//! ```text
//! SamplingJob ──bounded mpsc──▶ Recorder ──▶ SampleStore
//!      │
//!      └─▶ Tsl2591 ◀── AutoGainCalibrator (on overflow)
//! ```

pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod job;
pub mod logging;
pub mod lux;
pub mod measurement;
pub mod meter;
pub mod recorder;

pub use error::{AppResult, MeterError};
pub use meter::SunlightMeter;
