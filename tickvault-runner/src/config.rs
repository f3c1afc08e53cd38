//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable configuration:
//!
//! ```toml
//! [storage]
//! raw_dir = "data/raw"
//! processed_dir = "data/processed"
//!
//! [ingest]
//! tickers = ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA"]
//! start_date = "2018-01-01"
//! failure_policy = "fail_fast"
//!
//! [retry]
//! max_attempts = 3
//! delay_secs = 5
//! backoff = "fixed"
//!
//! [provider]
//! request_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tickvault_core::data::{validate_ticker, Backoff, RetryPolicy};

/// Instruments ingested when the config names none.
pub const DEFAULT_TICKERS: [&str; 5] = ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the orchestrator does when an instrument exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run; remaining instruments are not attempted.
    #[default]
    FailFast,
    /// Record the failure and continue with the next instrument.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    /// Inclusive. `None` means today.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub failure_policy: FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default(),
            end_date: None,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per instrument, including the first.
    pub max_attempts: u32,
    /// Fixed delay, or the base delay for exponential backoff.
    pub delay_secs: u64,
    pub backoff: BackoffKind,
    /// Cap for exponential backoff.
    pub max_delay_secs: u64,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 5,
            backoff: BackoffKind::Fixed,
            max_delay_secs: 60,
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.delay_secs);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed { delay },
            BackoffKind::Exponential => Backoff::Exponential {
                base: delay,
                factor: self.factor,
                max: Duration::from_secs(self.max_delay_secs),
                jitter: self.jitter,
            },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub retry: RetryConfig,
    pub provider: ProviderConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load from a TOML file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Inclusive end of the ingestion range, defaulting to today.
    pub fn end_date(&self) -> NaiveDate {
        self.ingest
            .end_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.backoff == BackoffKind::Exponential && self.retry.factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.factor must be >= 1.0, got {}",
                self.retry.factor
            )));
        }
        if self.ingest.tickers.is_empty() {
            return Err(ConfigError::Invalid("ingest.tickers is empty".into()));
        }
        for ticker in &self.ingest.tickers {
            validate_ticker(ticker).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        let end = self.end_date();
        if self.ingest.start_date > end {
            return Err(ConfigError::Invalid(format!(
                "ingest.start_date {} is after end date {end}",
                self.ingest.start_date
            )));
        }
        self.validate_storage()
    }

    /// Check that the raw and processed namespaces cannot touch each other.
    ///
    /// A processed write replaces its whole root and stages through
    /// `<processed>.staging` and `<processed>.old`, so none of those may
    /// equal, contain or sit inside the raw root.
    pub fn validate_storage(&self) -> Result<(), ConfigError> {
        let raw = resolve(&self.storage.raw_dir)?;
        let processed = resolve(&self.storage.processed_dir)?;

        if overlaps(&raw, &processed) {
            return Err(ConfigError::Invalid(format!(
                "storage.raw_dir {} and storage.processed_dir {} must not be equal or nested",
                raw.display(),
                processed.display()
            )));
        }

        if let Some(name) = processed.file_name() {
            for suffix in [".staging", ".old"] {
                let mut sibling = name.to_os_string();
                sibling.push(suffix);
                let sibling = processed.with_file_name(sibling);
                if overlaps(&raw, &sibling) {
                    return Err(ConfigError::Invalid(format!(
                        "storage.raw_dir {} overlaps processed scratch directory {}",
                        raw.display(),
                        sibling.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Absolute form of `path` with `.` and `..` folded and symlinks resolved
/// through the deepest ancestor that exists.
fn resolve(path: &Path) -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;

    let mut lexical = PathBuf::new();
    for component in cwd.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = std::fs::canonicalize(existing) {
            return Ok(missing.iter().rev().fold(real, |acc, part| acc.join(part)));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(lexical),
        }
    }
}
