//! Top-level facade wiring sensor, sampling job, recorder and store together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn, Span};

use crate::config::Settings;
use crate::data::{summarize, CsvStore, RangeSummary, SampleStore, StoredRecord};
use crate::error::{AppResult, MeterError};
use crate::hardware::i2c::LinuxI2cTransport;
use crate::hardware::mock::MockTransport;
use crate::hardware::{I2cTransport, Tsl2591};
use crate::job::{JobInfo, JobSettings, JobStatus, SamplingJob};
use crate::recorder::{Recorder, RecorderStats};

/// How long `shutdown()` waits for each background task.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Light level simulated by `--mock` runs, in counts per (ms × gain).
const MOCK_DAYLIGHT: (f64, f64) = (2.0, 0.4);

/// Snapshot reported by [`SunlightMeter::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterStatus {
    /// A sensor answered the startup probe.
    pub connected: bool,
    /// The sensor is powered on.
    pub enabled: bool,
    /// State of the job slot.
    pub job: JobStatus,
    /// The current job, if any.
    pub job_info: Option<JobInfo>,
}

struct RecorderTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<RecorderStats>,
}

/// One sensor, one job slot, one recorder.
pub struct SunlightMeter {
    device: Option<Arc<Tsl2591>>,
    job: SamplingJob,
    store: Arc<dyn SampleStore>,
    recorder: Mutex<Option<RecorderTask>>,
    span: Span,
}

impl SunlightMeter {
    /// Wire the pipeline and spawn the recorder. Must be called inside a Tokio runtime.
    pub fn new(
        device: Option<Tsl2591>,
        store: Arc<dyn SampleStore>,
        settings: JobSettings,
        channel_capacity: usize,
    ) -> Self {
        let span = tracing::info_span!("sunlight_meter");
        let device = device.map(Arc::new);
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));

        let job = SamplingJob::with_span(
            device.clone(),
            tx,
            settings,
            tracing::info_span!(parent: &span, "sampling_job"),
        );

        let (shutdown, shutdown_rx) = oneshot::channel();
        let recorder = Recorder::with_span(
            Arc::clone(&store),
            tracing::info_span!(parent: &span, "recorder"),
        );
        let handle = tokio::spawn(recorder.run(rx, shutdown_rx));

        Self {
            device,
            job,
            store,
            recorder: Mutex::new(Some(RecorderTask { shutdown, handle })),
            span,
        }
    }

    /// Build from loaded settings: probe the sensor (real or simulated) and open the
    /// CSV store. A sensor that fails the probe is logged and left absent.
    pub async fn from_settings(settings: &Settings, mock: bool) -> AppResult<Self> {
        let device = match open_transport(settings, mock) {
            Ok(transport) => match Tsl2591::probe(
                transport,
                settings.sensor.gain,
                settings.sensor.integration_time_ms,
            )
            .await
            {
                Ok(device) => Some(device),
                Err(e) => {
                    warn!(error = %e, "sensor probe failed");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to open sensor bus");
                None
            }
        };

        let store: Arc<dyn SampleStore> = Arc::new(CsvStore::new(&settings.storage.results_path));
        Ok(Self::new(
            device,
            store,
            settings.job.settings(),
            settings.job.channel_capacity,
        ))
    }

    /// Start a sampling job and return its id.
    pub async fn start_job(&self) -> AppResult<String> {
        self.job.start().await
    }

    /// Cancel the running job.
    pub async fn stop_job(&self) -> AppResult<()> {
        self.job.stop().await
    }

    /// Wait until the current job's loop exits (by stop or expiry).
    pub async fn wait_for_job(&self) {
        self.job.join().await;
    }

    /// Sensor and job state.
    pub async fn status(&self) -> MeterStatus {
        let enabled = match &self.device {
            Some(device) => device.status().await.enabled,
            None => false,
        };
        MeterStatus {
            connected: self.device.is_some(),
            enabled,
            job: self.job.status(),
            job_info: self.job.info(),
        }
    }

    /// Most recent stored row.
    pub async fn current_conditions(&self) -> AppResult<Option<StoredRecord>> {
        self.store
            .latest()
            .await
            .map_err(|e| MeterError::Storage(format!("{e:#}")))
    }

    /// Light-condition summary for rows stored in `[start, end]`.
    pub async fn summary(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<RangeSummary> {
        let rows = self
            .store
            .between(start, end)
            .await
            .map_err(|e| MeterError::Storage(format!("{e:#}")))?;
        Ok(summarize(&rows, start, end))
    }

    /// Stop any running job, wait for its loop, then stop the recorder after it has
    /// drained the queue. Each wait is bounded by [`SHUTDOWN_TIMEOUT`].
    pub async fn shutdown(self) -> AppResult<RecorderStats> {
        match self.job.stop().await {
            Ok(()) | Err(MeterError::NotRunning) => {}
            Err(e) => warn!(parent: &self.span, error = %e, "failed to stop job"),
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.job.join()).await.is_err() {
            warn!(parent: &self.span, "sampling loop did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }

        let recorder = self.recorder.lock().take();
        let Some(RecorderTask { shutdown, mut handle }) = recorder else {
            return Ok(RecorderStats::default());
        };

        info!(parent: &self.span, "sending shutdown signal to recorder");
        if shutdown.send(()).is_err() {
            warn!(parent: &self.span, "recorder already stopped");
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(MeterError::Storage(format!("recorder task failed: {e}"))),
            Err(_) => {
                warn!(parent: &self.span, "recorder did not stop within {:?}, aborting", SHUTDOWN_TIMEOUT);
                handle.abort();
                Err(MeterError::Storage("recorder shutdown timed out".to_string()))
            }
        }
    }
}

fn open_transport(settings: &Settings, mock: bool) -> AppResult<Box<dyn I2cTransport>> {
    if mock {
        let (full_spectrum, infrared) = MOCK_DAYLIGHT;
        return Ok(Box::new(MockTransport::with_light(full_spectrum, infrared)));
    }
    let path = settings.sensor.i2c_path.to_string_lossy();
    let transport = LinuxI2cTransport::open(&path, settings.sensor.address)
        .map_err(|e| MeterError::DeviceAbsent(format!("{e:#}")))?;
    Ok(Box::new(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LightCondition, MemoryStore};
    use crate::hardware::{Gain, IntegrationTime};

    #[tokio::test(start_paused = true)]
    async fn test_absent_sensor_reports_disconnected() {
        let meter = SunlightMeter::new(
            None,
            Arc::new(MemoryStore::new()),
            JobSettings::default(),
            8,
        );
        let status = meter.status().await;
        assert!(!status.connected);
        assert!(!status.enabled);
        assert!(matches!(meter.start_job().await, Err(MeterError::DeviceAbsent(_))));

        let end = Utc::now();
        let summary = meter
            .summary(end - chrono::Duration::hours(8), end)
            .await
            .unwrap();
        assert_eq!(summary.condition, LightCondition::NoData);
        meter.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_persists_in_flight_samples() {
        let mock = MockTransport::with_light(1.0, 0.1);
        let device = Tsl2591::probe(Box::new(mock.clone()), Gain::Low, IntegrationTime::Ms300)
            .await
            .unwrap();
        let store = MemoryStore::new();
        let meter = SunlightMeter::new(
            Some(device),
            Arc::new(store.clone()),
            JobSettings {
                max_duration: Duration::from_secs(3600),
                record_interval: Duration::from_secs(10),
            },
            4,
        );

        let id = meter.start_job().await.unwrap();
        assert!(meter.status().await.enabled);
        tokio::time::sleep(Duration::from_secs(35)).await;

        let stats = meter.shutdown().await.unwrap();
        assert_eq!(stats.persisted, 4);
        assert!(store.rows().iter().all(|row| row.job_id == id));
        assert_eq!(mock.enable_register(), 0x00);
    }
}
