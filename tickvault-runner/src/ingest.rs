//! Ingestion orchestrator: fetch each instrument with retries, write its raw partition.
//!
//! Instruments are processed one at a time in input order. Under
//! `FailurePolicy::FailFast` the first unrecovered fetch error ends the run;
//! partitions already written stay on disk. Under `FailurePolicy::Lenient`
//! the failure is recorded and the run moves on. Raw write failures end the
//! run under either policy.

use chrono::NaiveDate;
use std::path::PathBuf;
use tickvault_core::data::{with_retry, CancelFlag, DataError, RawStore, RetryPolicy, SourceClient};

use crate::config::FailurePolicy;
use crate::pipeline::PipelineError;

/// Progress callbacks for a batch of instruments.
pub trait IngestProgress {
    /// Called before fetching an instrument.
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// Called after an instrument is written (`Ok(rows)`) or has failed.
    fn on_complete(&self, ticker: &str, index: usize, total: usize, result: &Result<usize, DataError>);

    /// Called once the batch is done. Not called when the run aborts.
    fn on_batch_complete(&self, summary: &IngestSummary);
}

/// Progress reporter that logs through `tracing`.
pub struct TracingProgress;

impl IngestProgress for TracingProgress {
    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        tracing::info!("[{}/{total}] ingesting {ticker}", index + 1);
    }

    fn on_complete(&self, ticker: &str, _index: usize, _total: usize, result: &Result<usize, DataError>) {
        match result {
            Ok(rows) => tracing::info!(ticker, rows, "ingested"),
            Err(e) => tracing::error!(ticker, "ingest failed: {e}"),
        }
    }

    fn on_batch_complete(&self, summary: &IngestSummary) {
        tracing::info!(
            attempted = summary.attempted.len(),
            written = summary.written.len(),
            failed = summary.failures.len(),
            rows = summary.rows_written,
            "ingest complete"
        );
    }
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<usize, DataError>) {}
    fn on_batch_complete(&self, _: &IngestSummary) {}
}

/// One instrument the run gave up on (lenient mode only).
#[derive(Debug)]
pub struct IngestFailure {
    pub ticker: String,
    pub error: DataError,
}

/// Outcome of an ingestion run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    /// Every instrument fetched, in order.
    pub attempted: Vec<String>,
    /// Instruments whose raw partition was written, in order.
    pub written: Vec<String>,
    /// Paths of the written partitions, parallel to `written`.
    pub paths: Vec<PathBuf>,
    pub rows_written: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct IngestionOrchestrator<'a> {
    source: &'a dyn SourceClient,
    store: &'a RawStore,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
    cancel: Option<CancelFlag>,
}

impl<'a> IngestionOrchestrator<'a> {
    pub fn new(source: &'a dyn SourceClient, store: &'a RawStore) -> Self {
        Self {
            source,
            store,
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            cancel: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Ingest `tickers` over the inclusive range `[start, end]`.
    pub fn run(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
        progress: &dyn IngestProgress,
    ) -> Result<IngestSummary, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidRange { start, end });
        }

        let total = tickers.len();
        let mut summary = IngestSummary::default();

        tracing::info!(
            total,
            %start,
            %end,
            source = self.source.name(),
            policy = ?self.failure_policy,
            "ingest started"
        );

        for (i, ticker) in tickers.iter().enumerate() {
            progress.on_start(ticker, i, total);
            summary.attempted.push(ticker.clone());

            let records = match with_retry(
                self.source,
                ticker,
                start,
                end,
                &self.retry,
                self.cancel.as_ref(),
            ) {
                Ok(records) => records,
                Err(error) => {
                    progress.on_complete(ticker, i, total, &Err(error.clone()));
                    let abort = self.failure_policy == FailurePolicy::FailFast
                        || matches!(error, DataError::Cancelled);
                    if abort {
                        return Err(PipelineError::Fetch {
                            instrument: ticker.clone(),
                            source: error,
                        });
                    }
                    summary.failures.push(IngestFailure {
                        ticker: ticker.clone(),
                        error,
                    });
                    continue;
                }
            };

            let path = match self.store.write_partition(ticker, &records) {
                Ok(path) => path,
                Err(error) => {
                    progress.on_complete(ticker, i, total, &Err(error.clone()));
                    return Err(PipelineError::Write {
                        instrument: ticker.clone(),
                        source: error,
                    });
                }
            };

            progress.on_complete(ticker, i, total, &Ok(records.len()));
            summary.written.push(ticker.clone());
            summary.paths.push(path);
            summary.rows_written += records.len();
        }

        progress.on_batch_complete(&summary);
        Ok(summary)
    }
}
