//! tickvault runner: configuration, logging and pipeline orchestration.
//!
//! This crate builds on `tickvault-core` to provide:
//! - TOML pipeline configuration with defaults and validation
//! - `tracing` subscriber setup
//! - Ingestion orchestrator with fail-fast or lenient failure policy
//! - End-to-end ingest → transform → persist pipeline

pub mod config;
pub mod ingest;
pub mod logging;
pub mod pipeline;

pub use config::{ConfigError, FailurePolicy, PipelineConfig};
pub use ingest::{
    IngestFailure, IngestProgress, IngestSummary, IngestionOrchestrator, NoProgress,
    TracingProgress,
};
pub use logging::init_logging;
pub use pipeline::{
    build_source, run_ingest, run_pipeline, run_transform, PipelineError, PipelineReport,
    TransformReport,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_and_errors_are_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
        assert_send::<IngestSummary>();
    }
}
