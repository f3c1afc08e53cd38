//! Transform engine: raw partitions → processed dataset.
//!
//! Stages, in order:
//! 1. Schema cast (per partition, in parallel): strings to dates and numbers,
//!    anything unparsable becomes null
//! 2. Validation: drop rows with a null date or null ticker. A ticker that
//!    cannot name a partition directory (`A/B`, `..`) counts as null
//! 3. Deduplication on (ticker, date), first occurrence wins
//! 4. Enrichment: year, month, daily_return
//!
//! Occurrence order is partition path order, then row order within a file,
//! so the surviving duplicate is the same on every run.

use super::provider::{validate_ticker, DataError};
use super::raw_store::{PARTITION_FILE, PARTITION_PREFIX};
use super::record::{ProcessedDataset, ProcessedRecord, RawRecord, RAW_COLUMNS};
use chrono::NaiveDate;
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Row counts for one transform run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub partitions: usize,
    pub rows_read: usize,
    pub rows_invalid: usize,
    pub rows_duplicate: usize,
    pub rows_out: usize,
}

/// One raw row after the schema cast. Every field may be null at this point.
#[derive(Debug, Clone, Default, PartialEq)]
struct CastRow {
    date: Option<NaiveDate>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    adj_close: Option<f64>,
    volume: Option<i64>,
    ticker: Option<String>,
}

impl CastRow {
    fn is_valid(&self) -> bool {
        self.date.is_some() && self.ticker.is_some()
    }
}

pub struct TransformEngine {
    raw_root: PathBuf,
}

impl TransformEngine {
    pub fn new(raw_root: impl Into<PathBuf>) -> Self {
        Self {
            raw_root: raw_root.into(),
        }
    }

    /// All `ticker=*/data.csv` files under the raw root, in lexicographic order.
    pub fn discover_partitions(&self) -> Result<Vec<PathBuf>, DataError> {
        if !self.raw_root.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.raw_root).map_err(|e| DataError::MalformedPartition {
            path: self.raw_root.clone(),
            reason: format!("read dir: {e}"),
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(PARTITION_PREFIX)
            })
            .map(|entry| entry.path().join(PARTITION_FILE))
            .filter(|path| path.is_file())
            .collect();

        files.sort();
        Ok(files)
    }

    /// Run the transform and return the processed dataset.
    pub fn run(&self) -> Result<ProcessedDataset, DataError> {
        self.run_with_stats().map(|(dataset, _)| dataset)
    }

    /// Run the transform, also returning per-stage row counts.
    pub fn run_with_stats(&self) -> Result<(ProcessedDataset, TransformStats), DataError> {
        let partitions = self.discover_partitions()?;
        if partitions.is_empty() {
            return Err(DataError::EmptySource {
                root: self.raw_root.clone(),
            });
        }

        tracing::info!(partitions = partitions.len(), root = %self.raw_root.display(), "transform started");

        // Stage 1: cast, one partition per rayon task. Collecting keeps path order.
        let per_partition: Vec<Vec<CastRow>> = partitions
            .par_iter()
            .map(|path| read_partition(path))
            .collect::<Result<_, _>>()?;
        let rows: Vec<CastRow> = per_partition.into_iter().flatten().collect();

        let rows_read = rows.len();
        let rows_valid = rows.iter().filter(|r| r.is_valid()).count();

        // Stages 2-3 on the global view
        let frame = rows_to_dataframe(&rows)?;
        let deduped = validate_and_dedup(frame.lazy())
            .collect()
            .map_err(|e| DataError::Transform(format!("dedup: {e}")))?;

        // Stage 4
        let records: Vec<ProcessedRecord> = dataframe_to_records(&deduped)?
            .into_iter()
            .map(ProcessedRecord::from_raw)
            .collect();
        let dataset = ProcessedDataset::new(records);

        let stats = TransformStats {
            partitions: partitions.len(),
            rows_read,
            rows_invalid: rows_read - rows_valid,
            rows_duplicate: rows_valid - dataset.len(),
            rows_out: dataset.len(),
        };
        tracing::info!(
            rows_read = stats.rows_read,
            rows_invalid = stats.rows_invalid,
            rows_duplicate = stats.rows_duplicate,
            rows_out = stats.rows_out,
            "transform finished"
        );

        Ok((dataset, stats))
    }
}

/// Drop rows without a date or ticker, then keep the first row per (ticker, date).
fn validate_and_dedup(frame: LazyFrame) -> LazyFrame {
    frame
        .filter(col("date").is_not_null().and(col("ticker").is_not_null()))
        .unique_stable(
            Some(vec!["ticker".into(), "date".into()]),
            UniqueKeepStrategy::First,
        )
        .sort(
            ["ticker", "date"],
            SortMultipleOptions::default().with_maintain_order(true),
        )
}

// ── Schema cast ─────────────────────────────────────────────────────

/// Read one raw partition file and cast every row.
///
/// A missing file, unreadable CSV or missing header column is fatal. Bad
/// values inside a row only null out that field.
fn read_partition(path: &Path) -> Result<Vec<CastRow>, DataError> {
    let malformed = |reason: String| DataError::MalformedPartition {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| malformed(format!("open: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| malformed(format!("header: {e}")))?
        .clone();

    let mut index = [0usize; RAW_COLUMNS.len()];
    for (slot, name) in index.iter_mut().zip(RAW_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| malformed(format!("missing column '{name}'")))?;
    }
    let [date_i, open_i, high_i, low_i, close_i, adj_i, vol_i, ticker_i] = index;

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| malformed(format!("row {}: {e}", line + 1)))?;
        let field = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

        rows.push(CastRow {
            date: field(date_i).and_then(parse_date),
            open: field(open_i).and_then(parse_decimal),
            high: field(high_i).and_then(parse_decimal),
            low: field(low_i).and_then(parse_decimal),
            close: field(close_i).and_then(parse_decimal),
            adj_close: field(adj_i).and_then(parse_decimal),
            volume: field(vol_i).and_then(parse_volume),
            ticker: field(ticker_i).and_then(parse_ticker),
        });
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "read raw partition");
    Ok(rows)
}

fn parse_ticker(s: &str) -> Option<String> {
    match validate_ticker(s) {
        Ok(()) => Some(s.to_string()),
        Err(_) => {
            tracing::warn!(ticker = s, "dropping row with unusable ticker");
            None
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Finite decimals only; `NaN`/`inf` text is treated as null.
fn parse_decimal(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer volume. Whole-valued decimals ("1200.0") are accepted.
fn parse_volume(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        parse_decimal(s)
            .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
            .map(|v| v as i64)
    })
}

// ── DataFrame conversion ────────────────────────────────────────────

fn epoch() -> NaiveDate {
    // chrono's default date is 1970-01-01
    NaiveDate::default()
}

fn rows_to_dataframe(rows: &[CastRow]) -> Result<DataFrame, DataError> {
    let to_err = |e: PolarsError| DataError::Transform(format!("dataframe creation: {e}"));
    let epoch = epoch();

    let dates: Vec<Option<i32>> = rows
        .iter()
        .map(|r| r.date.map(|d| (d - epoch).num_days() as i32))
        .collect();
    let opens: Vec<Option<f64>> = rows.iter().map(|r| r.open).collect();
    let highs: Vec<Option<f64>> = rows.iter().map(|r| r.high).collect();
    let lows: Vec<Option<f64>> = rows.iter().map(|r| r.low).collect();
    let closes: Vec<Option<f64>> = rows.iter().map(|r| r.close).collect();
    let adj_closes: Vec<Option<f64>> = rows.iter().map(|r| r.adj_close).collect();
    let volumes: Vec<Option<i64>> = rows.iter().map(|r| r.volume).collect();
    let tickers: Vec<Option<String>> = rows.iter().map(|r| r.ticker.clone()).collect();

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
    ])
    .map_err(to_err)
}

/// Convert a validated frame back into raw records. Null dates or tickers are an error.
fn dataframe_to_records(df: &DataFrame) -> Result<Vec<RawRecord>, DataError> {
    let col_err = |e: PolarsError| DataError::Transform(format!("column read: {e}"));

    let date_ca = df.column("date").map_err(col_err)?.date().map_err(col_err)?;
    let open_ca = df.column("open").map_err(col_err)?.f64().map_err(col_err)?;
    let high_ca = df.column("high").map_err(col_err)?.f64().map_err(col_err)?;
    let low_ca = df.column("low").map_err(col_err)?.f64().map_err(col_err)?;
    let close_ca = df.column("close").map_err(col_err)?.f64().map_err(col_err)?;
    let adj_ca = df.column("adj_close").map_err(col_err)?.f64().map_err(col_err)?;
    let vol_ca = df.column("volume").map_err(col_err)?.i64().map_err(col_err)?;
    let ticker_ca = df.column("ticker").map_err(col_err)?.str().map_err(col_err)?;

    let epoch = epoch();
    let mut records = Vec::with_capacity(df.height());

    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::Transform(format!("null date at row {i}")))?;
        let ticker = ticker_ca
            .get(i)
            .ok_or_else(|| DataError::Transform(format!("null ticker at row {i}")))?;

        records.push(RawRecord {
            date: epoch + chrono::Duration::days(days as i64),
            open: open_ca.get(i),
            high: high_ca.get(i),
            low: low_ca.get(i),
            close: close_ca.get(i),
            adj_close: adj_ca.get(i),
            volume: vol_ca.get(i),
            ticker: ticker.to_string(),
        });
    }

    Ok(records)
}
