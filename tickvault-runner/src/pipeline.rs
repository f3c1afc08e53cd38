//! End-to-end pipeline: ingest → transform → persist.

use chrono::NaiveDate;
use thiserror::Error;
use tickvault_core::data::{
    CancelFlag, DataError, DatasetManifest, ProcessedStore, RawStore, SourceClient,
    SyntheticSource, TransformEngine, TransformStats, YahooSource,
};

use crate::config::{ConfigError, PipelineConfig};
use crate::ingest::{IngestProgress, IngestSummary, IngestionOrchestrator};

/// Pipeline errors, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("fetch failed for {instrument}: {source}")]
    Fetch {
        instrument: String,
        #[source]
        source: DataError,
    },
    #[error("raw write failed for {instrument}: {source}")]
    Write {
        instrument: String,
        #[source]
        source: DataError,
    },
    #[error("transform failed: {0}")]
    Transform(#[source] DataError),
    #[error("processed write failed: {0}")]
    Persist(#[source] DataError),
    #[error("source setup failed: {0}")]
    Source(#[source] DataError),
}

/// Outcome of a transform-and-persist pass.
#[derive(Debug)]
pub struct TransformReport {
    pub stats: TransformStats,
    pub manifest: DatasetManifest,
}

/// Outcome of a full pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub ingest: IngestSummary,
    pub transform: TransformReport,
}

/// Source client for a config: Yahoo Finance, or the synthetic walk for offline runs.
pub fn build_source(
    config: &PipelineConfig,
    synthetic: bool,
) -> Result<Box<dyn SourceClient>, PipelineError> {
    if synthetic {
        return Ok(Box::new(SyntheticSource::new()));
    }
    let source = YahooSource::new(config.provider.timeout()).map_err(PipelineError::Source)?;
    Ok(Box::new(source))
}

/// Ingest every configured ticker into the raw store.
pub fn run_ingest(
    config: &PipelineConfig,
    source: &dyn SourceClient,
    progress: &dyn IngestProgress,
    cancel: Option<CancelFlag>,
) -> Result<IngestSummary, PipelineError> {
    config.validate()?;

    let store = RawStore::new(&config.storage.raw_dir);
    let mut orchestrator = IngestionOrchestrator::new(source, &store)
        .with_retry_policy(config.retry.to_policy())
        .with_failure_policy(config.ingest.failure_policy);
    if let Some(flag) = cancel {
        orchestrator = orchestrator.with_cancel_flag(flag);
    }

    orchestrator.run(
        &config.ingest.tickers,
        config.ingest.start_date,
        config.end_date(),
        progress,
    )
}

/// Transform the raw store and replace the processed dataset.
///
/// Refuses to run when the processed root could overwrite the raw store.
pub fn run_transform(config: &PipelineConfig) -> Result<TransformReport, PipelineError> {
    config.validate_storage()?;

    let engine = TransformEngine::new(&config.storage.raw_dir);
    let (dataset, stats) = engine.run_with_stats().map_err(PipelineError::Transform)?;

    let store = ProcessedStore::new(&config.storage.processed_dir);
    let manifest = store
        .write_dataset(&dataset)
        .map_err(PipelineError::Persist)?;

    Ok(TransformReport { stats, manifest })
}

/// Ingest, then transform and persist.
///
/// In lenient mode the transform still runs after per-instrument failures,
/// over whatever raw partitions exist.
pub fn run_pipeline(
    config: &PipelineConfig,
    source: &dyn SourceClient,
    progress: &dyn IngestProgress,
    cancel: Option<CancelFlag>,
) -> Result<PipelineReport, PipelineError> {
    let ingest = run_ingest(config, source, progress, cancel)?;
    let transform = run_transform(config)?;

    tracing::info!(
        written = ingest.written.len(),
        failed = ingest.failures.len(),
        rows = transform.manifest.row_count,
        partitions = transform.manifest.partitions.len(),
        "pipeline finished"
    );

    Ok(PipelineReport { ingest, transform })
}
