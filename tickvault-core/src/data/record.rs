//! Raw and processed daily records.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column order of a raw partition file.
pub const RAW_COLUMNS: [&str; 8] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "adj_close",
    "volume",
    "ticker",
];

/// Column order of a processed partition file.
pub const PROCESSED_COLUMNS: [&str; 11] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "adj_close",
    "volume",
    "ticker",
    "year",
    "month",
    "daily_return",
];

/// One instrument, one trading date, as returned by a source client.
///
/// Field order matches `RAW_COLUMNS`; the raw store serializes this struct
/// directly, so reordering fields changes the file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<i64>,
    pub ticker: String,
}

/// A validated, deduplicated, enriched record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<i64>,
    pub ticker: String,
    pub year: i32,
    pub month: i32,
    pub daily_return: Option<f64>,
}

impl ProcessedRecord {
    /// Enrich a raw record with calendar fields and the open-to-close return.
    pub fn from_raw(raw: RawRecord) -> Self {
        let daily_return = daily_return(raw.open, raw.close);
        Self {
            year: raw.date.year(),
            month: raw.date.month() as i32,
            daily_return,
            date: raw.date,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            adj_close: raw.adj_close,
            volume: raw.volume,
            ticker: raw.ticker,
        }
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey {
            ticker: self.ticker.clone(),
            year: self.year,
        }
    }
}

/// `(close - open) / open`, null when either side is null or open is zero.
pub fn daily_return(open: Option<f64>, close: Option<f64>) -> Option<f64> {
    match (open, close) {
        (Some(o), Some(c)) if o != 0.0 => Some((c - o) / o),
        _ => None,
    }
}

/// Address of one processed partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub ticker: String,
    pub year: i32,
}

impl PartitionKey {
    /// Relative directory of the partition: `ticker={T}/year={Y}`.
    pub fn relative_dir(&self) -> String {
        format!("ticker={}/year={}", self.ticker, self.year)
    }
}

/// The full processed dataset, sorted by (ticker, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedDataset {
    pub records: Vec<ProcessedRecord>,
}

impl ProcessedDataset {
    pub fn new(mut records: Vec<ProcessedRecord>) -> Self {
        records.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(a.date.cmp(&b.date)));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Group records by (ticker, year). Keys iterate in sorted order.
    pub fn partitions(&self) -> BTreeMap<PartitionKey, Vec<&ProcessedRecord>> {
        let mut groups: BTreeMap<PartitionKey, Vec<&ProcessedRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.partition_key()).or_default().push(record);
        }
        groups
    }

    /// Look up the record for a (ticker, date) pair.
    pub fn get(&self, ticker: &str, date: NaiveDate) -> Option<&ProcessedRecord> {
        self.records
            .iter()
            .find(|r| r.ticker == ticker && r.date == date)
    }
}
