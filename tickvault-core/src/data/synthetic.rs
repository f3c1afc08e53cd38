//! Synthetic source client for offline runs and tests.
//!
//! Produces a simple random walk from a starting price of 100.0, weekdays
//! only. The walk is seeded from the ticker, so the same ticker and range
//! always produce the same records.

use super::provider::{validate_request, DataError, SourceClient};
use super::record::RawRecord;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn new() -> Self {
        Self
    }

    /// Generate the walk for `ticker`. Returns an empty vec if the range has no weekdays.
    pub fn generate(ticker: &str, start: NaiveDate, end: NaiveDate) -> Vec<RawRecord> {
        // Deterministic seed from the ticker
        let seed: [u8; 32] = *blake3::hash(ticker.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let mut records = Vec::new();
        let mut price = 100.0_f64;
        let mut current = start;

        while current <= end {
            if matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                current += chrono::Duration::days(1);
                continue;
            }

            let ret: f64 = rng.gen_range(-0.03..0.03);
            let open = price;
            let close = price * (1.0 + ret);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000..5_000_000i64);

            records.push(RawRecord {
                date: current,
                open: Some(open),
                high: Some(high),
                low: Some(low),
                close: Some(close),
                adj_close: Some(close),
                volume: Some(volume),
                ticker: ticker.to_string(),
            });

            price = close;
            current += chrono::Duration::days(1);
        }

        records
    }
}

impl SourceClient for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError> {
        validate_request(instrument, start, end)?;
        let records = Self::generate(instrument, start, end);
        if records.is_empty() {
            return Err(DataError::NoData {
                instrument: instrument.to_string(),
                start,
                end,
            });
        }
        Ok(records)
    }
}
