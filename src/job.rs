//! Timed sampling job.
//!
//! A [`SamplingJob`] owns the lifecycle of at most one background sampling loop:
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──────▶ Cancelled ──▶ Idle
//!                          └──deadline────▶ Expired   ──▶ Idle
//! ```
//!
//! Each tick reads both channels, computes lux and pushes a [`Sample`] into the bounded
//! channel that feeds the recorder. `send` waits for capacity, so a slow recorder
//! slows the sampler down instead of losing readings.
//!
//! Cancellation is cooperative. `stop()` flips a `watch` flag that the loop checks at
//! the top of every tick; the wait between ticks also wakes on the flag or on the
//! deadline. A register read already in progress is allowed to finish.
//!
//! Each job gets its own cancel and completion channels. `start()` and `stop()` swap
//! and signal them under one lock together with their status transition, so a stop
//! can never be lost to a concurrent start.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use crate::calibration::AutoGainCalibrator;
use crate::error::{AppResult, MeterError};
use crate::hardware::Tsl2591;
use crate::lux;
use crate::measurement::Sample;

/// Default hard limit on a job's lifetime.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(8 * 60 * 60);

/// Default time between samples.
pub const DEFAULT_RECORD_INTERVAL: Duration = Duration::from_secs(30);

/// Timing parameters for every job started by a [`SamplingJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    /// Job stops by itself once this much time has passed since start.
    pub max_duration: Duration,
    /// Period of the sampling ticker.
    pub record_interval: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            record_interval: DEFAULT_RECORD_INTERVAL,
        }
    }
}

/// Lifecycle state of the job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum JobStatus {
    /// No loop is running; `start()` is accepted.
    Idle = 0,
    /// A loop is sampling.
    Running = 1,
    /// `stop()` was called and the loop has not exited yet.
    Cancelled = 2,
    /// The deadline passed and the loop is exiting.
    Expired = 3,
}

impl JobStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Cancelled,
            3 => Self::Expired,
            _ => Self::Idle,
        }
    }
}

/// Identity and timing of the current job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    /// UUID v4 assigned at start.
    pub id: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time after which the job expires.
    pub deadline: DateTime<Utc>,
}

struct JobShared {
    device: Option<Arc<Tsl2591>>,
    tx: mpsc::Sender<Sample>,
    settings: JobSettings,
    status: AtomicU8,
    info: Mutex<Option<JobInfo>>,
    span: Span,
}

impl JobShared {
    fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: JobStatus, to: JobStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Signals belonging to one started job.
struct JobControl {
    /// Set to `true` by `stop()`.
    cancel: watch::Sender<bool>,
    /// Becomes `true` (or closes) once the loop has released the slot.
    finished: watch::Receiver<bool>,
}

/// Single-slot sampling job bound to one sensor and one output channel.
pub struct SamplingJob {
    shared: Arc<JobShared>,
    control: Mutex<Option<JobControl>>,
}

impl SamplingJob {
    /// Job slot for `device` (or `None` when no sensor was found at startup).
    pub fn new(
        device: Option<Arc<Tsl2591>>,
        tx: mpsc::Sender<Sample>,
        settings: JobSettings,
    ) -> Self {
        Self::with_span(device, tx, settings, tracing::info_span!("sampling_job"))
    }

    /// [`SamplingJob::new`] with an injected logging span.
    pub fn with_span(
        device: Option<Arc<Tsl2591>>,
        tx: mpsc::Sender<Sample>,
        settings: JobSettings,
        span: Span,
    ) -> Self {
        Self {
            shared: Arc::new(JobShared {
                device,
                tx,
                settings,
                status: AtomicU8::new(JobStatus::Idle as u8),
                info: Mutex::new(None),
                span,
            }),
            control: Mutex::new(None),
        }
    }

    /// Start sampling in the background and return the new job id.
    ///
    /// # Errors
    ///
    /// * `DeviceAbsent` - no sensor was found at startup
    /// * `AlreadyRunning` - the slot is not Idle
    /// * `Configuration` - the job settings cannot drive a ticker
    pub async fn start(&self) -> AppResult<String> {
        let device = self.shared.device.clone().ok_or_else(|| {
            MeterError::DeviceAbsent("no sensor was detected at startup".to_string())
        })?;
        let settings = self.shared.settings;
        if settings.record_interval.is_zero() {
            return Err(MeterError::Configuration(
                "record interval must be greater than zero".to_string(),
            ));
        }
        let max_duration = chrono::Duration::from_std(settings.max_duration)
            .map_err(|e| MeterError::Configuration(format!("max duration out of range: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let info = JobInfo {
            id: id.clone(),
            started_at,
            deadline: started_at + max_duration,
        };

        let (cancel, finished) = {
            let mut control = self.control.lock();
            if !self.shared.transition(JobStatus::Idle, JobStatus::Running) {
                return Err(MeterError::AlreadyRunning);
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (finished_tx, finished_rx) = watch::channel(false);
            *control = Some(JobControl {
                cancel: cancel_tx,
                finished: finished_rx,
            });
            *self.shared.info.lock() = Some(info.clone());
            (cancel_rx, finished_tx)
        };

        // A concurrent stop() may already have powered the sensor down; the loop then
        // exits on its first check and disables it again.
        if let Err(e) = device.enable().await {
            warn!(parent: &self.shared.span, job_id = %id, error = %e, "failed to enable sensor");
        }

        let deadline = Instant::now() + settings.max_duration;
        tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            device,
            id.clone(),
            deadline,
            cancel,
            finished,
        ));

        info!(
            parent: &self.shared.span,
            job_id = %id,
            deadline = %info.deadline,
            interval = ?settings.record_interval,
            "sampling job started"
        );
        Ok(id)
    }

    /// Signal the running loop to stop and power the sensor down.
    ///
    /// Returns once the signal is issued; use [`SamplingJob::join`] to wait for the
    /// loop to exit.
    ///
    /// # Errors
    ///
    /// `NotRunning` unless the status is Running.
    pub async fn stop(&self) -> AppResult<()> {
        {
            let control = self.control.lock();
            if !self.shared.transition(JobStatus::Running, JobStatus::Cancelled) {
                return Err(MeterError::NotRunning);
            }
            if let Some(control) = control.as_ref() {
                control.cancel.send_replace(true);
            }
        }

        if let Some(device) = &self.shared.device {
            if let Err(e) = device.disable().await {
                warn!(parent: &self.shared.span, error = %e, "failed to disable sensor");
            }
        }
        info!(parent: &self.shared.span, "sampling job cancelled");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> JobStatus {
        self.shared.status()
    }

    /// True while a job is Running.
    pub fn is_running(&self) -> bool {
        self.status() == JobStatus::Running
    }

    /// The current job, if one has not finished yet.
    pub fn info(&self) -> Option<JobInfo> {
        self.shared.info.lock().clone()
    }

    /// Whether a sensor was found at startup.
    pub fn has_device(&self) -> bool {
        self.shared.device.is_some()
    }

    /// Wait for the most recent loop to exit. Returns immediately when none exists.
    ///
    /// Cancel safe: dropping the returned future leaves the job untouched, and a later
    /// `join()` still waits for the same loop.
    pub async fn join(&self) {
        let finished = self
            .control
            .lock()
            .as_ref()
            .map(|control| control.finished.clone());
        if let Some(mut finished) = finished {
            // A closed channel means the loop is gone without reporting.
            if finished.wait_for(|done| *done).await.is_err() {
                warn!(parent: &self.shared.span, "sampling loop ended without releasing the slot");
            }
        }
    }
}

async fn run_loop(
    shared: Arc<JobShared>,
    device: Arc<Tsl2591>,
    job_id: String,
    deadline: Instant,
    mut cancel: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
) {
    let span = shared.span.clone();
    let calibrator = AutoGainCalibrator::with_span(
        Arc::clone(&device),
        tracing::info_span!(parent: &span, "calibration", job_id = %job_id),
    );

    let mut ticker = tokio::time::interval(shared.settings.record_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    let mut sequence: u64 = 0;
    let expired = loop {
        if *cancel.borrow() || shared.status() != JobStatus::Running {
            break false;
        }
        if Instant::now() >= deadline {
            break true;
        }

        let sample = match device.read_channels().await {
            Ok(reading) => match lux::calculate(
                reading.ch0,
                reading.ch1,
                reading.gain,
                reading.integration_time,
            ) {
                Ok(lux) => Some(Sample::from_reading(
                    &job_id,
                    sequence,
                    reading.ch0,
                    reading.ch1,
                    lux,
                )),
                Err(e) => {
                    warn!(parent: &span, job_id = %job_id, error = %e, "sensor saturated, recalibrating");
                    match calibrator.calibrate().await {
                        Ok(c) => debug!(
                            parent: &span,
                            gain = %c.gain,
                            integration_time = %c.integration_time,
                            "calibration complete"
                        ),
                        Err(e) => warn!(parent: &span, error = %e, "calibration failed"),
                    }
                    None
                }
            },
            Err(e) => {
                if *cancel.borrow() {
                    break false;
                }
                warn!(parent: &span, job_id = %job_id, sequence, error = %e, "sensor read failed");
                Some(Sample::read_failure(&job_id, sequence))
            }
        };

        if let Some(sample) = sample {
            debug!(parent: &span, sequence, lux = sample.lux, "sample taken");
            sequence += 1;
            if shared.tx.send(sample).await.is_err() {
                warn!(parent: &span, "recorder channel closed, ending job");
                break false;
            }
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.changed() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    };

    if expired && shared.transition(JobStatus::Running, JobStatus::Expired) {
        info!(parent: &span, job_id = %job_id, samples = sequence, "sampling job expired");
    }
    if let Err(e) = device.disable().await {
        warn!(parent: &span, error = %e, "failed to disable sensor");
    }
    shared.info.lock().take();
    shared.set_status(JobStatus::Idle);
    finished.send_replace(true);
    debug!(parent: &span, job_id = %job_id, "sampling loop exited");
}
