//! Single consumer that drains the sample channel into a [`SampleStore`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Span};

use crate::data::SampleStore;
use crate::measurement::{Sample, SampleRecord};

/// Counters reported when the recorder exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    /// Rows written to the store.
    pub persisted: u64,
    /// Samples discarded before storage (read failures and non-finite lux).
    pub dropped: u64,
    /// Rows the store refused.
    pub failed: u64,
}

/// Persists samples in the order they were produced.
pub struct Recorder {
    store: Arc<dyn SampleStore>,
    span: Span,
    stats: RecorderStats,
}

impl Recorder {
    /// Recorder writing to `store`.
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self::with_span(store, tracing::info_span!("recorder"))
    }

    /// [`Recorder::new`] with an injected logging span.
    pub fn with_span(store: Arc<dyn SampleStore>, span: Span) -> Self {
        Self {
            store,
            span,
            stats: RecorderStats::default(),
        }
    }

    /// Consume `rx` until it closes or `shutdown` fires, then drain what is queued.
    ///
    /// Storage errors are logged and never end the loop.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Sample>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> RecorderStats {
        if let Err(e) = self.store.init().await {
            error!(parent: &self.span, error = %e, "failed to initialize store");
        }

        loop {
            tokio::select! {
                sample = rx.recv() => match sample {
                    Some(sample) => self.record(sample).await,
                    None => {
                        info!(parent: &self.span, "sample channel closed, stopping recorder");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!(parent: &self.span, "recorder received shutdown signal");
                    rx.close();
                    while let Ok(sample) = rx.try_recv() {
                        self.record(sample).await;
                    }
                    break;
                }
            }
        }

        if let Err(e) = self.store.shutdown().await {
            error!(parent: &self.span, error = %e, "failed to shut down store");
        }
        info!(
            parent: &self.span,
            persisted = self.stats.persisted,
            dropped = self.stats.dropped,
            failed = self.stats.failed,
            "recorder stopped"
        );
        self.stats
    }

    async fn record(&mut self, sample: Sample) {
        if sample.is_read_failure() {
            warn!(
                parent: &self.span,
                job_id = %sample.job_id,
                sequence = sample.sequence,
                "skipping read-failure sample"
            );
            self.stats.dropped += 1;
            return;
        }

        let record = match SampleRecord::try_from(&sample) {
            Ok(record) => record,
            Err(e) => {
                warn!(parent: &self.span, job_id = %sample.job_id, error = %e, "dropping sample");
                self.stats.dropped += 1;
                return;
            }
        };

        match self.store.insert(&record).await {
            Ok(()) => {
                debug!(parent: &self.span, sequence = sample.sequence, lux = %record.lux, "sample stored");
                self.stats.persisted += 1;
            }
            Err(e) => {
                error!(parent: &self.span, job_id = %sample.job_id, error = %e, "failed to store sample");
                self.stats.failed += 1;
            }
        }
    }
}
