//! Persistence and analysis of recorded samples.

pub mod storage;
pub mod summary;

pub use storage::{CsvStore, MemoryStore, SampleStore, StoredRecord};
pub use summary::{summarize, LightCondition, RangeSummary};
