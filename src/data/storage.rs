//! Sample stores with clean feature flag handling.
//!
//! The recorder is the only writer. Queries (`latest`, `between`) may run from any
//! task and read back what has been persisted so far.
use crate::{error::MeterError, measurement::SampleRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A persisted row, as read back from a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct StoredRecord {
    /// Timestamp assigned by the store when the row was written.
    pub created_at: DateTime<Utc>,
    pub job_id: String,
    pub lux: f64,
    pub full_spectrum: f64,
    pub visible: f64,
    pub infrared: f64,
}

impl StoredRecord {
    fn parse(record: &SampleRecord, created_at: DateTime<Utc>) -> Result<Self> {
        let number = |field: &str, text: &str| -> Result<f64> {
            text.parse::<f64>()
                .with_context(|| format!("Invalid {} value '{}'", field, text))
        };
        Ok(Self {
            created_at,
            job_id: record.job_id.clone(),
            lux: number("lux", &record.lux)?,
            full_spectrum: number("full_spectrum", &record.full_spectrum)?,
            visible: number("visible", &record.visible)?,
            infrared: number("infrared", &record.infrared)?,
        })
    }
}

/// Storage collaborator for accepted samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Prepare the backing storage. Must be called before `insert`.
    async fn init(&self) -> Result<()>;

    /// Persist one row, stamping it with the current time.
    async fn insert(&self, record: &SampleRecord) -> Result<()>;

    /// Most recently inserted row.
    async fn latest(&self) -> Result<Option<StoredRecord>>;

    /// Rows with `start <= created_at <= end`, oldest first.
    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<StoredRecord>>;

    /// Flush and release the backing storage.
    async fn shutdown(&self) -> Result<()>;
}

// ============================================================================
// Memory Store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    rows: Vec<StoredRecord>,
    failing_inserts: usize,
}

/// Store that keeps rows in memory. Clones share the same rows.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row inserted so far, oldest first.
    pub fn rows(&self) -> Vec<StoredRecord> {
        self.inner.lock().rows.clone()
    }

    /// Insert a row with an explicit timestamp.
    pub fn insert_at(&self, record: &SampleRecord, created_at: DateTime<Utc>) -> Result<()> {
        let row = StoredRecord::parse(record, created_at)?;
        self.inner.lock().rows.push(row);
        Ok(())
    }

    /// Make the next `count` inserts fail.
    pub fn fail_next_inserts(&self, count: usize) {
        self.inner.lock().failing_inserts = count;
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, record: &SampleRecord) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.failing_inserts > 0 {
                inner.failing_inserts -= 1;
                return Err(MeterError::Storage("simulated insert failure".to_string()).into());
            }
        }
        self.insert_at(record, Utc::now())
    }

    async fn latest(&self) -> Result<Option<StoredRecord>> {
        Ok(self.inner.lock().rows.last().cloned())
    }

    async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<StoredRecord>> {
        Ok(self
            .inner
            .lock()
            .rows
            .iter()
            .filter(|row| row.created_at >= start && row.created_at <= end)
            .cloned()
            .collect())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// CSV Store
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::path::{Path, PathBuf};

    const HEADER: [&str; 6] = [
        "created_at",
        "job_id",
        "lux",
        "full_spectrum",
        "visible",
        "infrared",
    ];

    /// Append-only CSV file with one row per accepted sample.
    pub struct CsvStore {
        path: PathBuf,
        writer: Mutex<Option<csv::Writer<File>>>,
    }

    impl CsvStore {
        /// Store backed by the file at `path` (created on `init`).
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
                writer: Mutex::new(None),
            }
        }

        /// Location of the results file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn read_all(&self) -> Result<Vec<StoredRecord>> {
            if !self.path.exists() {
                return Ok(Vec::new());
            }
            let mut reader = csv::Reader::from_path(&self.path)
                .with_context(|| format!("Failed to open results file at {:?}", self.path))?;
            let mut rows = Vec::new();
            for row in reader.deserialize() {
                let row: StoredRecord =
                    row.with_context(|| format!("Malformed row in {:?}", self.path))?;
                rows.push(row);
            }
            Ok(rows)
        }
    }

    #[async_trait]
    impl SampleStore for CsvStore {
        async fn init(&self) -> Result<()> {
            if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("Failed to create storage directory at {:?}", dir))?;
                }
            }
            let needs_header = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open results file at {:?}", self.path))?;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            if needs_header {
                writer
                    .write_record(HEADER)
                    .context("Failed to write CSV header")?;
                writer.flush().context("Failed to flush CSV header")?;
            }
            *self.writer.lock() = Some(writer);
            tracing::info!("CSV store initialized at '{}'.", self.path.display());
            Ok(())
        }

        async fn insert(&self, record: &SampleRecord) -> Result<()> {
            let mut guard = self.writer.lock();
            let writer = guard
                .as_mut()
                .ok_or_else(|| MeterError::Storage("CSV store is not initialized".to_string()))?;
            writer
                .write_record([
                    Utc::now().to_rfc3339(),
                    record.job_id.clone(),
                    record.lux.clone(),
                    record.full_spectrum.clone(),
                    record.visible.clone(),
                    record.infrared.clone(),
                ])
                .context("Failed to write sample to CSV file")?;
            writer.flush().context("Failed to flush CSV writer")?;
            Ok(())
        }

        async fn latest(&self) -> Result<Option<StoredRecord>> {
            Ok(self.read_all()?.pop())
        }

        async fn between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<StoredRecord>> {
            Ok(self
                .read_all()?
                .into_iter()
                .filter(|row| row.created_at >= start && row.created_at <= end)
                .collect())
        }

        async fn shutdown(&self) -> Result<()> {
            if let Some(mut writer) = self.writer.lock().take() {
                writer.flush().context("Failed to flush CSV writer")?;
            }
            tracing::info!("CSV store shut down.");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use std::path::Path;

    /// Placeholder used when the crate is built without `storage_csv`.
    pub struct CsvStore;

    impl CsvStore {
        /// Accepts a path for signature compatibility; every operation fails.
        pub fn new(_path: impl AsRef<Path>) -> Self {
            Self
        }
    }

    #[async_trait]
    impl SampleStore for CsvStore {
        async fn init(&self) -> Result<()> {
            Err(MeterError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn insert(&self, _record: &SampleRecord) -> Result<()> {
            Err(MeterError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn latest(&self) -> Result<Option<StoredRecord>> {
            Err(MeterError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn between(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<StoredRecord>> {
            Err(MeterError::FeatureNotEnabled("storage_csv".to_string()).into())
        }

        async fn shutdown(&self) -> Result<()> {
            Err(MeterError::FeatureNotEnabled("storage_csv".to_string()).into())
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvStore;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvStore;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(job_id: &str, lux: &str) -> SampleRecord {
        SampleRecord {
            job_id: job_id.to_string(),
            lux: lux.to_string(),
            full_spectrum: "1.5259e-01".to_string(),
            visible: "1.2207e-01".to_string(),
            infrared: "3.0518e-02".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_latest_and_range() {
        let store = MemoryStore::new();
        assert!(store.latest().await.unwrap().is_none());

        let t0 = Utc::now();
        store.insert_at(&record("a", "1.00000"), t0).unwrap();
        store
            .insert_at(&record("a", "2.00000"), t0 + chrono::Duration::minutes(5))
            .unwrap();
        store
            .insert_at(&record("b", "3.00000"), t0 + chrono::Duration::minutes(10))
            .unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.job_id, "b");
        assert_eq!(latest.lux, 3.0);
        assert!((latest.full_spectrum - 0.15259).abs() < 1e-12);

        let range = store
            .between(t0, t0 + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_injected_failure() {
        let store = MemoryStore::new();
        store.fail_next_inserts(1);
        assert!(store.insert(&record("a", "1.0")).await.is_err());
        assert!(store.insert(&record("a", "1.0")).await.is_ok());
        assert_eq!(store.rows().len(), 1);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("sunlight.csv");

        let store = CsvStore::new(&path);
        assert!(store.insert(&record("a", "1.0")).await.is_err());
        store.init().await.unwrap();
        store.insert(&record("job-1", "8704.00000")).await.unwrap();
        store.insert(&record("job-1", "12.34568")).await.unwrap();
        store.shutdown().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "created_at,job_id,lux,full_spectrum,visible,infrared"
        );
        assert!(lines.next().unwrap().contains(",job-1,8704.00000,1.5259e-01,"));

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.lux, 12.34568);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_queries_do_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("sunlight.csv");

        let store = CsvStore::new(&path);
        assert!(store.latest().await.unwrap().is_none());
        let rows = store
            .between(Utc::now() - chrono::Duration::hours(8), Utc::now())
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(!path.exists());
        assert!(!dir.path().join("results").exists());
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_store_appends_without_duplicate_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sunlight.csv");

        for lux in ["1.00000", "2.00000"] {
            let store = CsvStore::new(&path);
            store.init().await.unwrap();
            store.insert(&record("job", lux)).await.unwrap();
            store.shutdown().await.unwrap();
        }

        let store = CsvStore::new(&path);
        let rows = store
            .between(Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lux, 1.0);
    }
}
