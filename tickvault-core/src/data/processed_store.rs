//! Processed store: Parquet dataset with Hive-style (ticker, year) partitions.
//!
//! Layout: `{processed_dir}/ticker={TICKER}/year={YEAR}/part-00000.parquet`
//! plus a `_manifest.json` at the root.
//!
//! Every write replaces the whole dataset. The new dataset is built in a
//! sibling staging directory and swapped in with two renames: the old root
//! moves to `<root>.old`, then staging moves to `<root>`. Partition files are
//! never half-written, but between the two renames the root is absent, and a
//! reader in that window finds no dataset at all.

use super::provider::{validate_ticker, DataError};
use super::record::{PartitionKey, ProcessedDataset, ProcessedRecord, PROCESSED_COLUMNS};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the single object inside a processed partition.
pub const PART_FILE: &str = "part-00000.parquet";

/// Dataset-level metadata file.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// One partition entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPartition {
    pub ticker: String,
    pub year: i32,
    pub rows: usize,
}

/// Summary of the dataset currently on disk.
///
/// Contains no timestamps, so writing the same dataset twice produces the
/// same manifest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub row_count: usize,
    pub partitions: Vec<ManifestPartition>,
    /// BLAKE3 hash of the JSON-serialized records.
    pub content_hash: String,
}

/// Partition predicate for `scan`. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionFilter {
    pub ticker: Option<String>,
    pub year: Option<i32>,
}

impl PartitionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ticker(ticker: impl Into<String>) -> Self {
        Self {
            ticker: Some(ticker.into()),
            year: None,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    fn matches_ticker(&self, ticker: &str) -> bool {
        self.ticker.as_deref().map_or(true, |t| t == ticker)
    }

    fn matches_year(&self, year: i32) -> bool {
        self.year.map_or(true, |y| y == year)
    }
}

pub struct ProcessedStore {
    root: PathBuf,
}

impl ProcessedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the processed namespace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the partition file for a key.
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        partition_file(&self.root, key)
    }

    /// Sibling of the root directory, e.g. `processed.staging`.
    fn sibling(&self, suffix: &str) -> Result<PathBuf, DataError> {
        let name = self
            .root
            .file_name()
            .ok_or_else(|| DataError::write(self.root.display(), "root has no directory name"))?;
        let mut sibling = name.to_os_string();
        sibling.push(suffix);
        Ok(self.root.with_file_name(sibling))
    }

    /// Replace the entire dataset with `dataset`.
    ///
    /// Partitions absent from `dataset` disappear. Writing the same dataset
    /// twice yields byte-identical partition files.
    pub fn write_dataset(&self, dataset: &ProcessedDataset) -> Result<DatasetManifest, DataError> {
        let staging = self.sibling(".staging")?;
        let retired = self.sibling(".old")?;

        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|e| DataError::write(staging.display(), format!("clear staging: {e}")))?;
        }
        fs::create_dir_all(&staging)
            .map_err(|e| DataError::write(staging.display(), format!("create dir: {e}")))?;

        let result = self.build_staging(&staging, dataset);
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        self.swap_in(&staging, &retired)?;

        tracing::info!(
            rows = manifest.row_count,
            partitions = manifest.partitions.len(),
            root = %self.root.display(),
            "saved processed dataset"
        );
        Ok(manifest)
    }

    fn build_staging(
        &self,
        staging: &Path,
        dataset: &ProcessedDataset,
    ) -> Result<DatasetManifest, DataError> {
        let mut partitions = Vec::new();

        for (key, records) in dataset.partitions() {
            validate_ticker(&key.ticker).map_err(|_| DataError::MalformedPartition {
                path: staging.join(key.relative_dir()),
                reason: format!("ticker '{}' cannot name a partition directory", key.ticker),
            })?;

            let path = partition_file(staging, &key);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)
                    .map_err(|e| DataError::write(dir.display(), format!("create dir: {e}")))?;
            }

            let mut df = records_to_dataframe(&records)?;
            write_parquet(&mut df, &path)?;
            tracing::debug!(partition = %key.relative_dir(), rows = records.len(), "wrote partition");

            partitions.push(ManifestPartition {
                ticker: key.ticker,
                year: key.year,
                rows: records.len(),
            });
        }

        let content_hash = blake3::hash(
            &serde_json::to_vec(&dataset.records)
                .map_err(|e| DataError::write(MANIFEST_FILE, format!("hash serialization: {e}")))?,
        )
        .to_hex()
        .to_string();

        let manifest = DatasetManifest {
            row_count: dataset.len(),
            partitions,
            content_hash,
        };

        let manifest_path = staging.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| DataError::write(manifest_path.display(), format!("serialize: {e}")))?;
        fs::write(&manifest_path, json)
            .map_err(|e| DataError::write(manifest_path.display(), e))?;

        Ok(manifest)
    }

    /// Move the current root aside, move staging into place, drop the old root.
    fn swap_in(&self, staging: &Path, retired: &Path) -> Result<(), DataError> {
        if retired.exists() {
            fs::remove_dir_all(retired)
                .map_err(|e| DataError::write(retired.display(), format!("clear old: {e}")))?;
        }

        let had_previous = self.root.exists();
        if had_previous {
            fs::rename(&self.root, retired)
                .map_err(|e| DataError::write(self.root.display(), format!("retire old dataset: {e}")))?;
        }

        if let Err(e) = fs::rename(staging, &self.root) {
            // Put the previous dataset back
            if had_previous {
                let _ = fs::rename(retired, &self.root);
            }
            let _ = fs::remove_dir_all(staging);
            return Err(DataError::write(self.root.display(), format!("swap in dataset: {e}")));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(retired) {
                tracing::warn!(path = %retired.display(), "failed to remove old dataset: {e}");
            }
        }
        Ok(())
    }

    /// Manifest of the dataset on disk, if one has been written.
    pub fn manifest(&self) -> Result<Option<DatasetManifest>, DataError> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| DataError::MalformedPartition {
            path: path.clone(),
            reason: format!("read manifest: {e}"),
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| DataError::MalformedPartition {
                path,
                reason: format!("parse manifest: {e}"),
            })
    }

    /// Partition keys present on disk, sorted.
    pub fn partitions(&self) -> Result<Vec<PartitionKey>, DataError> {
        self.matching_partitions(&PartitionFilter::all())
    }

    /// Records in partitions matching `filter`, sorted by (ticker, date).
    ///
    /// Pruning happens on directory names; non-matching partitions are never opened.
    pub fn scan(&self, filter: &PartitionFilter) -> Result<Vec<ProcessedRecord>, DataError> {
        let mut records = Vec::new();
        for key in self.matching_partitions(filter)? {
            let path = partition_file(&self.root, &key);
            records.extend(read_parquet(&path)?);
        }
        tracing::debug!(rows = records.len(), ?filter, "scan finished");
        Ok(records)
    }

    fn matching_partitions(&self, filter: &PartitionFilter) -> Result<Vec<PartitionKey>, DataError> {
        let mut keys = Vec::new();

        for (ticker, ticker_dir) in list_prefixed(&self.root, "ticker=")? {
            if !filter.matches_ticker(&ticker) {
                continue;
            }
            for (year, _) in list_prefixed(&ticker_dir, "year=")? {
                let Ok(year) = year.parse::<i32>() else {
                    continue;
                };
                if !filter.matches_year(year) {
                    continue;
                }
                let key = PartitionKey {
                    ticker: ticker.clone(),
                    year,
                };
                if partition_file(&self.root, &key).is_file() {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn partition_file(root: &Path, key: &PartitionKey) -> PathBuf {
    root.join(format!("ticker={}", key.ticker))
        .join(format!("year={}", key.year))
        .join(PART_FILE)
}

/// Subdirectories of `dir` named `{prefix}{value}`, as (value, path). Missing `dir` is empty.
fn list_prefixed(dir: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, DataError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| DataError::MalformedPartition {
        path: dir.to_path_buf(),
        reason: format!("read dir: {e}"),
    })?;

    Ok(entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let value = name.strip_prefix(prefix)?.to_string();
            Some((value, entry.path()))
        })
        .collect())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn records_to_dataframe(records: &[&ProcessedRecord]) -> Result<DataFrame, DataError> {
    let to_err = |e: PolarsError| DataError::write("dataframe", e);
    let epoch = epoch();

    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let opens: Vec<Option<f64>> = records.iter().map(|r| r.open).collect();
    let highs: Vec<Option<f64>> = records.iter().map(|r| r.high).collect();
    let lows: Vec<Option<f64>> = records.iter().map(|r| r.low).collect();
    let closes: Vec<Option<f64>> = records.iter().map(|r| r.close).collect();
    let adj_closes: Vec<Option<f64>> = records.iter().map(|r| r.adj_close).collect();
    let volumes: Vec<Option<i64>> = records.iter().map(|r| r.volume).collect();
    let tickers: Vec<&str> = records.iter().map(|r| r.ticker.as_str()).collect();
    let years: Vec<i32> = records.iter().map(|r| r.year).collect();
    let months: Vec<i32> = records.iter().map(|r| r.month).collect();
    let returns: Vec<Option<f64>> = records.iter().map(|r| r.daily_return).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(to_err)?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
        Column::new("ticker".into(), tickers),
        Column::new("year".into(), years),
        Column::new("month".into(), months),
        Column::new("daily_return".into(), returns),
    ])
    .map_err(to_err)
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file = fs::File::create(path)
        .map_err(|e| DataError::write(path.display(), format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::write(path.display(), format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Vec<ProcessedRecord>, DataError> {
    let malformed = |reason: String| DataError::MalformedPartition {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| malformed(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| malformed(format!("read: {e}")))?;

    for name in PROCESSED_COLUMNS {
        if df.column(name).is_err() {
            return Err(malformed(format!("missing column '{name}'")));
        }
    }

    dataframe_to_records(&df).map_err(malformed)
}

fn dataframe_to_records(df: &DataFrame) -> Result<Vec<ProcessedRecord>, String> {
    let col_err = |e: PolarsError| format!("column read: {e}");

    let date_ca = df.column("date").map_err(col_err)?.date().map_err(col_err)?;
    let open_ca = df.column("open").map_err(col_err)?.f64().map_err(col_err)?;
    let high_ca = df.column("high").map_err(col_err)?.f64().map_err(col_err)?;
    let low_ca = df.column("low").map_err(col_err)?.f64().map_err(col_err)?;
    let close_ca = df.column("close").map_err(col_err)?.f64().map_err(col_err)?;
    let adj_ca = df.column("adj_close").map_err(col_err)?.f64().map_err(col_err)?;
    let vol_ca = df.column("volume").map_err(col_err)?.i64().map_err(col_err)?;
    let ticker_ca = df.column("ticker").map_err(col_err)?.str().map_err(col_err)?;
    let year_ca = df.column("year").map_err(col_err)?.i32().map_err(col_err)?;
    let month_ca = df.column("month").map_err(col_err)?.i32().map_err(col_err)?;
    let ret_ca = df
        .column("daily_return")
        .map_err(col_err)?
        .f64()
        .map_err(col_err)?;

    let epoch = epoch();
    let mut records = Vec::with_capacity(df.height());

    for i in 0..df.height() {
        let days = date_ca.get(i).ok_or_else(|| format!("null date at row {i}"))?;
        let ticker = ticker_ca.get(i).ok_or_else(|| format!("null ticker at row {i}"))?;
        let year = year_ca.get(i).ok_or_else(|| format!("null year at row {i}"))?;
        let month = month_ca.get(i).ok_or_else(|| format!("null month at row {i}"))?;

        records.push(ProcessedRecord {
            date: epoch + chrono::Duration::days(days as i64),
            open: open_ca.get(i),
            high: high_ca.get(i),
            low: low_ca.get(i),
            close: close_ca.get(i),
            adj_close: adj_ca.get(i),
            volume: vol_ca.get(i),
            ticker: ticker.to_string(),
            year,
            month,
            daily_return: ret_ca.get(i),
        });
    }

    Ok(records)
}
