//! Raw store: one CSV file per ticker with Hive-style partition directories.
//!
//! Layout: `{raw_dir}/ticker={TICKER}/data.csv`
//!
//! Each write replaces the partition wholesale (write to .tmp, rename into
//! place). There is no append or merge.

use super::provider::{validate_ticker, DataError};
use super::record::{RawRecord, RAW_COLUMNS};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the single object inside a raw partition.
pub const PARTITION_FILE: &str = "data.csv";

/// Directory-name prefix of a raw partition.
pub const PARTITION_PREFIX: &str = "ticker=";

pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the raw namespace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a ticker: `{root}/ticker={TICKER}/`
    fn partition_dir(&self, ticker: &str) -> PathBuf {
        self.root.join(format!("{PARTITION_PREFIX}{ticker}"))
    }

    /// Path of the partition file for a ticker.
    pub fn partition_path(&self, ticker: &str) -> PathBuf {
        self.partition_dir(ticker).join(PARTITION_FILE)
    }

    /// Replace the partition for `ticker` with `records`.
    ///
    /// The file has a header row and one row per record, in input order.
    /// Null fields are written as empty values.
    pub fn write_partition(&self, ticker: &str, records: &[RawRecord]) -> Result<PathBuf, DataError> {
        validate_ticker(ticker)?;

        let dir = self.partition_dir(ticker);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::write(dir.display(), format!("create dir: {e}")))?;

        let path = dir.join(PARTITION_FILE);
        let tmp_path = path.with_extension("csv.tmp");

        if let Err(e) = write_csv(&tmp_path, records) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::write(path.display(), format!("atomic rename failed: {e}"))
        })?;

        tracing::info!(ticker, rows = records.len(), path = %path.display(), "saved raw partition");
        Ok(path)
    }

    /// Tickers that currently have a partition file, sorted.
    pub fn list_tickers(&self) -> Result<Vec<String>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| DataError::write(self.root.display(), format!("read dir: {e}")))?;

        let mut tickers: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let ticker = name.strip_prefix(PARTITION_PREFIX)?.to_string();
                entry.path().join(PARTITION_FILE).is_file().then_some(ticker)
            })
            .collect();

        tickers.sort();
        Ok(tickers)
    }
}

fn write_csv(path: &Path, records: &[RawRecord]) -> Result<(), DataError> {
    let write_err = |e: &dyn std::fmt::Display| DataError::write(path.display(), e);

    // Headers are written explicitly so an empty partition still has one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| write_err(&e))?;

    writer.write_record(RAW_COLUMNS).map_err(|e| write_err(&e))?;
    for record in records {
        writer.serialize(record).map_err(|e| write_err(&e))?;
    }
    writer.flush().map_err(|e| write_err(&e))?;
    Ok(())
}
