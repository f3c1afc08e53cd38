//! End-to-end tests for ingestion policies and the full pipeline.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;
use tickvault_core::data::{
    DataError, PartitionFilter, ProcessedStore, RawRecord, RawStore, RetryPolicy, SourceClient,
    SyntheticSource,
};
use tickvault_runner::config::{FailurePolicy, PipelineConfig};
use tickvault_runner::{
    run_ingest, run_pipeline, run_transform, IngestionOrchestrator, NoProgress, PipelineError,
};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Synthetic data, except for `broken` tickers which always fail.
/// Records every fetch call in order.
struct ScriptedSource {
    broken: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn new(broken: &[&str]) -> Self {
        Self {
            broken: broken.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceClient for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError> {
        self.calls.lock().unwrap().push(instrument.to_string());
        if self.broken.contains(instrument) {
            return Err(DataError::Provider {
                instrument: instrument.to_string(),
                reason: "connection reset".into(),
            });
        }
        SyntheticSource.fetch(instrument, start, end)
    }
}

fn config_in(dir: &TempDir, tickers: &[&str], policy: FailurePolicy) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.storage.raw_dir = dir.path().join("raw");
    config.storage.processed_dir = dir.path().join("processed");
    config.ingest.tickers = tickers.iter().map(|t| t.to_string()).collect();
    config.ingest.start_date = d("2020-12-01");
    config.ingest.end_date = Some(d("2021-01-29"));
    config.ingest.failure_policy = policy;
    config.retry.max_attempts = 3;
    config.retry.delay_secs = 0;
    config
}

fn tickers(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[test]
fn fail_fast_stops_at_first_exhausted_instrument() {
    let dir = TempDir::new().unwrap();
    let store = RawStore::new(dir.path().join("raw"));
    let source = ScriptedSource::new(&["B"]);

    let err = IngestionOrchestrator::new(&source, &store)
        .with_retry_policy(RetryPolicy::immediate(3))
        .run(&tickers(&["A", "B", "C"]), d("2024-01-01"), d("2024-01-31"), &NoProgress)
        .unwrap_err();

    match err {
        PipelineError::Fetch { instrument, .. } => assert_eq!(instrument, "B"),
        other => panic!("expected fetch error, got {other:?}"),
    }

    // A once, B three times, C never
    assert_eq!(source.calls(), vec!["A", "B", "B", "B"]);
    assert!(store.partition_path("A").is_file());
    assert!(!store.partition_path("B").exists());
    assert!(!store.partition_path("C").exists());
}

#[test]
fn lenient_attempts_every_instrument_and_reports_failures() {
    let dir = TempDir::new().unwrap();
    let store = RawStore::new(dir.path().join("raw"));
    let source = ScriptedSource::new(&["B", "D"]);

    let summary = IngestionOrchestrator::new(&source, &store)
        .with_retry_policy(RetryPolicy::immediate(2))
        .with_failure_policy(FailurePolicy::Lenient)
        .run(&tickers(&["A", "B", "C", "D"]), d("2024-01-01"), d("2024-01-31"), &NoProgress)
        .unwrap();

    assert_eq!(summary.attempted, vec!["A", "B", "C", "D"]);
    assert_eq!(summary.written, vec!["A", "C"]);
    let failed: Vec<&str> = summary.failures.iter().map(|f| f.ticker.as_str()).collect();
    assert_eq!(failed, vec!["B", "D"]);
    assert!(!summary.all_succeeded());
    assert_eq!(store.list_tickers().unwrap(), vec!["A", "C"]);
}

#[test]
fn inverted_range_is_rejected_before_any_fetch() {
    let dir = TempDir::new().unwrap();
    let store = RawStore::new(dir.path().join("raw"));
    let source = ScriptedSource::new(&[]);

    let err = IngestionOrchestrator::new(&source, &store)
        .run(&tickers(&["A"]), d("2024-02-01"), d("2024-01-01"), &NoProgress)
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidRange { .. }));
    assert!(source.calls().is_empty());
}

#[test]
fn write_failure_is_fatal_even_when_lenient() {
    let dir = TempDir::new().unwrap();
    // A regular file where the raw root directory should be
    let blocker = dir.path().join("raw");
    fs::write(&blocker, "not a directory").unwrap();
    let store = RawStore::new(&blocker);
    let source = ScriptedSource::new(&[]);

    let err = IngestionOrchestrator::new(&source, &store)
        .with_failure_policy(FailurePolicy::Lenient)
        .run(&tickers(&["A", "B"]), d("2024-01-01"), d("2024-01-31"), &NoProgress)
        .unwrap_err();

    match err {
        PipelineError::Write { instrument, .. } => assert_eq!(instrument, "A"),
        other => panic!("expected write error, got {other:?}"),
    }
    assert_eq!(source.calls(), vec!["A"]);
}

#[test]
fn full_pipeline_produces_partitioned_dataset() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, &["AAPL", "MSFT"], FailurePolicy::FailFast);
    let source = ScriptedSource::new(&[]);

    let report = run_pipeline(&config, &source, &NoProgress, None).unwrap();
    assert_eq!(report.ingest.written, vec!["AAPL", "MSFT"]);
    assert_eq!(report.transform.stats.partitions, 2);
    assert_eq!(report.transform.stats.rows_duplicate, 0);
    // Two tickers, December 2020 and January 2021
    assert_eq!(report.transform.manifest.partitions.len(), 4);

    let store = ProcessedStore::new(&config.storage.processed_dir);
    let msft_2021 = store
        .scan(&PartitionFilter::ticker("MSFT").with_year(2021))
        .unwrap();
    assert!(!msft_2021.is_empty());
    assert!(msft_2021.iter().all(|r| r.month == 1 && r.daily_return.is_some()));
}

#[test]
fn lenient_pipeline_transforms_what_was_ingested() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, &["GOOD", "BAD"], FailurePolicy::Lenient);
    let source = ScriptedSource::new(&["BAD"]);

    let report = run_pipeline(&config, &source, &NoProgress, None).unwrap();
    assert_eq!(report.ingest.failures.len(), 1);

    let store = ProcessedStore::new(&config.storage.processed_dir);
    let keys = store.partitions().unwrap();
    assert!(keys.iter().all(|k| k.ticker == "GOOD"));
}

#[test]
fn rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, &["SPY"], FailurePolicy::FailFast);
    let source = ScriptedSource::new(&[]);

    run_pipeline(&config, &source, &NoProgress, None).unwrap();
    let store = ProcessedStore::new(&config.storage.processed_dir);
    let keys = store.partitions().unwrap();
    let first: Vec<Vec<u8>> = keys
        .iter()
        .map(|k| fs::read(store.partition_path(k)).unwrap())
        .collect();
    let raw_first = fs::read(RawStore::new(&config.storage.raw_dir).partition_path("SPY")).unwrap();

    run_pipeline(&config, &source, &NoProgress, None).unwrap();
    let second: Vec<Vec<u8>> = keys
        .iter()
        .map(|k| fs::read(store.partition_path(k)).unwrap())
        .collect();
    let raw_second =
        fs::read(RawStore::new(&config.storage.raw_dir).partition_path("SPY")).unwrap();

    assert_eq!(store.partitions().unwrap(), keys);
    assert_eq!(first, second);
    assert_eq!(raw_first, raw_second);
}

#[test]
fn transform_without_raw_data_is_empty_source() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir, &["SPY"], FailurePolicy::FailFast);

    let err = run_transform(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Transform(DataError::EmptySource { .. })));
}

#[test]
fn invalid_config_fails_before_ingest() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir, &["SPY"], FailurePolicy::FailFast);
    config.retry.max_attempts = 0;
    let source = ScriptedSource::new(&[]);

    let err = run_ingest(&config, &source, &NoProgress, None).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(source.calls().is_empty());
}

/// Put one raw partition on disk without going through config validation.
fn seed_raw(raw_dir: &std::path::Path, ticker: &str) -> std::path::PathBuf {
    let store = RawStore::new(raw_dir);
    let source = ScriptedSource::new(&[]);
    let summary = IngestionOrchestrator::new(&source, &store)
        .run(&tickers(&[ticker]), d("2024-01-01"), d("2024-01-31"), &NoProgress)
        .unwrap();
    summary.paths[0].clone()
}

#[test]
fn transform_refuses_processed_root_above_raw_root() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir, &["SPY"], FailurePolicy::FailFast);
    config.storage.processed_dir = dir.path().join("data");
    config.storage.raw_dir = dir.path().join("data").join("raw");
    let raw_file = seed_raw(&config.storage.raw_dir, "SPY");

    assert!(config.validate().is_err());
    let err = run_transform(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(raw_file.is_file());

    let source = ScriptedSource::new(&[]);
    let err = run_pipeline(&config, &source, &NoProgress, None).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(source.calls().is_empty());
    assert!(raw_file.is_file());
}

#[test]
fn transform_refuses_shared_root() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir, &["SPY"], FailurePolicy::FailFast);
    config.storage.processed_dir = config.storage.raw_dir.clone();
    let raw_file = seed_raw(&config.storage.raw_dir, "SPY");

    let err = run_transform(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(raw_file.is_file());

    // Raw data is still usable once the config is corrected
    config.storage.processed_dir = dir.path().join("processed");
    let report = run_transform(&config).unwrap();
    assert!(report.manifest.row_count > 0);
}
