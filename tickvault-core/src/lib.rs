//! tickvault core: market-data records, sources, stores and the transform engine.
//!
//! This crate contains the data path of the pipeline:
//! - Raw and processed record types
//! - The `SourceClient` trait with Yahoo Finance and synthetic implementations
//! - Retry controller with fixed or exponential backoff
//! - Raw store (one CSV per ticker, overwrite semantics)
//! - Transform engine (cast → filter → dedup → enrich)
//! - Processed store (Parquet partitioned by ticker and year)

pub mod data;

pub use data::{DataError, ProcessedRecord, RawRecord};
