//! Lifecycle tests for `SamplingJob` on a multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use sunlight_meter::hardware::mock::MockTransport;
use sunlight_meter::hardware::{Gain, IntegrationTime, Tsl2591};
use sunlight_meter::job::{JobSettings, JobStatus, SamplingJob};
use sunlight_meter::measurement::Sample;
use sunlight_meter::MeterError;
use tokio::sync::mpsc;

const CONCURRENT_STARTS: usize = 16;

async fn shared_job(mock: &MockTransport) -> (Arc<SamplingJob>, mpsc::Receiver<Sample>) {
    let device = Tsl2591::probe(Box::new(mock.clone()), Gain::Low, IntegrationTime::Ms100)
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(1024);
    let job = SamplingJob::new(
        Some(Arc::new(device)),
        tx,
        JobSettings {
            max_duration: Duration::from_secs(3600),
            record_interval: Duration::from_secs(1),
        },
    );
    (Arc::new(job), rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let mock = MockTransport::with_light(1.0, 0.1);
    let (job, _rx) = shared_job(&mock).await;

    let handles: Vec<_> = (0..CONCURRENT_STARTS)
        .map(|_| {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.start().await })
        })
        .collect();

    let mut started = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(id) => started.push(id),
            Err(MeterError::AlreadyRunning) => rejected += 1,
            Err(e) => panic!("unexpected start error: {e}"),
        }
    }
    assert_eq!(started.len(), 1);
    assert_eq!(rejected, CONCURRENT_STARTS - 1);
    assert_eq!(job.info().unwrap().id, started[0]);

    job.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), job.join())
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_racing_start_is_never_lost() {
    let mock = MockTransport::with_light(1.0, 0.1);
    let (job, _rx) = shared_job(&mock).await;

    for _ in 0..50 {
        let starter = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.start().await })
        };
        let stopper = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.stop().await })
        };
        starter.await.unwrap().unwrap();
        if let Err(e) = stopper.await.unwrap() {
            assert!(matches!(e, MeterError::NotRunning));
            job.stop().await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), job.join())
            .await
            .expect("sampling loop ignored a stop");
        assert_eq!(job.status(), JobStatus::Idle);
        assert_eq!(mock.enable_register(), 0x00);
    }
}
