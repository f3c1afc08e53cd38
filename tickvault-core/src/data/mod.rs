//! Ingestion sources, raw/processed storage and the transform engine.

pub mod processed_store;
pub mod provider;
pub mod raw_store;
pub mod record;
pub mod retry;
pub mod synthetic;
pub mod transform;
pub mod yahoo;

pub use processed_store::{DatasetManifest, ManifestPartition, PartitionFilter, ProcessedStore};
pub use provider::{validate_request, validate_ticker, DataError, SourceClient};
pub use raw_store::RawStore;
pub use record::{PartitionKey, ProcessedDataset, ProcessedRecord, RawRecord, PROCESSED_COLUMNS, RAW_COLUMNS};
pub use retry::{with_retry, Backoff, CancelFlag, RetryPolicy};
pub use synthetic::SyntheticSource;
pub use transform::{TransformEngine, TransformStats};
pub use yahoo::YahooSource;
