//! Tests for graceful shutdown of the full meter with a CSV store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sunlight_meter::config::Settings;
use sunlight_meter::data::{CsvStore, LightCondition, SampleStore};
use sunlight_meter::hardware::mock::MockTransport;
use sunlight_meter::hardware::{Gain, IntegrationTime, Tsl2591};
use sunlight_meter::job::{JobSettings, JobStatus};
use sunlight_meter::{MeterError, SunlightMeter};

async fn meter_with_csv(path: &std::path::Path, mock: &MockTransport) -> SunlightMeter {
    let device = Tsl2591::probe(Box::new(mock.clone()), Gain::Low, IntegrationTime::Ms100)
        .await
        .unwrap();
    SunlightMeter::new(
        Some(device),
        Arc::new(CsvStore::new(path)),
        JobSettings {
            max_duration: Duration::from_secs(3600),
            record_interval: Duration::from_secs(30),
        },
        64,
    )
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_running_job_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sunlight.csv");
    let mock = MockTransport::with_light(100.0, 10.0);
    let meter = meter_with_csv(&path, &mock).await;

    let id = meter.start_job().await.unwrap();
    assert!(matches!(meter.start_job().await, Err(MeterError::AlreadyRunning)));
    tokio::time::sleep(Duration::from_secs(65)).await;

    let status = meter.status().await;
    assert!(status.connected);
    assert!(status.enabled);
    assert_eq!(status.job, JobStatus::Running);
    assert_eq!(status.job_info.unwrap().id, id);

    let latest = meter.current_conditions().await.unwrap().unwrap();
    assert_eq!(latest.job_id, id);

    let stats = meter.shutdown().await.unwrap();
    assert_eq!(stats.persisted, 3);
    assert_eq!(mock.enable_register(), 0x00);

    // Rows survive the meter and can be summarized later.
    let store = CsvStore::new(&path);
    let rows = store
        .between(Utc::now() - chrono::Duration::hours(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.job_id == id));
}

#[tokio::test(start_paused = true)]
async fn test_summary_reflects_bright_readings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sunlight.csv");
    // Bright enough to exceed the full-sun threshold at low gain / 100 ms.
    let mock = MockTransport::with_light(600.0, 30.0);
    let meter = meter_with_csv(&path, &mock).await;

    meter.start_job().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    meter.stop_job().await.unwrap();
    meter.wait_for_job().await;

    let end = Utc::now();
    let summary = meter
        .summary(end - chrono::Duration::hours(8), end)
        .await
        .unwrap();
    assert_eq!(summary.samples, 1);
    assert!(summary.average_lux > 10_000.0);
    assert_eq!(summary.condition, LightCondition::FullSun);

    meter.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_from_settings_with_mock_sensor() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.results_path = dir.path().join("results.csv");

    let meter = SunlightMeter::from_settings(&settings, true).await.unwrap();
    let status = meter.status().await;
    assert!(status.connected);
    assert!(!status.enabled);
    assert_eq!(status.job, JobStatus::Idle);
    assert!(matches!(meter.stop_job().await, Err(MeterError::NotRunning)));

    meter.shutdown().await.unwrap();
}
