//! Source client trait and structured error types.
//!
//! The SourceClient trait abstracts over market-data providers (Yahoo Finance,
//! synthetic data) so the retry controller and orchestrator can be tested
//! against mocks.

use super::record::RawRecord;
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output as-is.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("provider error for {instrument}: {reason}")]
    Provider { instrument: String, reason: String },

    #[error("no data returned for {instrument} between {start} and {end}")]
    NoData {
        instrument: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("no raw partitions found under {}", root.display())]
    EmptySource { root: PathBuf },

    #[error("write failed for {target}: {reason}")]
    Write { target: String, reason: String },

    #[error("malformed raw partition {}: {reason}", path.display())]
    MalformedPartition { path: PathBuf, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("cancelled")]
    Cancelled,
}

impl DataError {
    /// Whether the retry controller should try again after this error.
    ///
    /// Empty results are retried under the same policy as transport failures:
    /// providers intermittently return empty bodies under load.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Provider { .. } | DataError::NoData { .. })
    }

    pub(crate) fn write(target: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        DataError::Write {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Trait for market-data sources.
///
/// Implementations return the full record set for the range or fail; there
/// is no partial success. Every record's `ticker` equals `instrument`.
pub trait SourceClient: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch daily records for an instrument over an inclusive date range.
    fn fetch(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError>;
}

/// Reject identifiers that are empty or unsafe to use as a partition directory name.
pub fn validate_ticker(ticker: &str) -> Result<(), DataError> {
    if ticker.trim().is_empty() {
        return Err(DataError::InvalidRequest("instrument id is empty".into()));
    }
    if ticker == "." || ticker == ".." || ticker.contains(['/', '\\']) {
        return Err(DataError::InvalidRequest(format!(
            "instrument id '{ticker}' is not a valid partition name"
        )));
    }
    Ok(())
}

/// Check the preconditions of a fetch call.
pub fn validate_request(instrument: &str, start: NaiveDate, end: NaiveDate) -> Result<(), DataError> {
    validate_ticker(instrument)?;
    if start > end {
        return Err(DataError::InvalidRequest(format!(
            "start date {start} is after end date {end}"
        )));
    }
    Ok(())
}
