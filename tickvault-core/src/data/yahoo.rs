//! Yahoo Finance source client.
//!
//! Fetches daily OHLCV rows from Yahoo's v8 chart API and normalizes them into
//! `RawRecord`s. Each call is a single HTTP request with an explicit timeout;
//! retrying is left to the retry controller.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.
//! Any response that does not parse is reported as a provider error.

use super::provider::{validate_request, DataError, SourceClient};
use super::record::RawRecord;
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

// Wire shape of the v8 chart endpoint. Only the fields we read are declared.

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartSeries>>,
    error: Option<ChartFault>,
}

#[derive(Debug, Deserialize)]
struct ChartFault {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartSeries {
    timestamp: Option<Vec<i64>>,
    indicators: SeriesIndicators,
}

#[derive(Debug, Deserialize)]
struct SeriesIndicators {
    quote: Vec<QuoteColumns>,
    adjclose: Option<Vec<AdjCloseColumn>>,
}

#[derive(Debug, Deserialize)]
struct QuoteColumns {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseColumn {
    adjclose: Vec<Option<f64>>,
}

/// Value at `i`, treating a short column like a null.
fn cell<T: Copy>(column: &[Option<T>], i: usize) -> Option<T> {
    column.get(i).copied().flatten()
}

/// Yahoo pads holidays with rows where every price and the volume are null.
fn is_padding(record: &RawRecord) -> bool {
    let prices = [record.open, record.high, record.low, record.close];
    prices.iter().all(Option::is_none) && record.volume.is_none()
}

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Yahoo Finance source client.
pub struct YahooSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooSource {
    pub fn new(timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Provider {
                instrument: "*".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: "https://query2.finance.yahoo.com".into(),
        })
    }

    /// Point the client at a different host (mirrors, local fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Chart API URL for a symbol and inclusive date range.
    ///
    /// The symbol is percent-encoded as a single path segment.
    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Url, DataError> {
        let bad_url = |reason: String| DataError::Provider {
            instrument: symbol.to_string(),
            reason,
        };

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| bad_url(format!("invalid base url '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| bad_url(format!("base url '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);

        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;
        url.query_pairs_mut()
            .append_pair("period1", &start_ts.to_string())
            .append_pair("period2", &end_ts.to_string())
            .append_pair("interval", "1d")
            .append_pair("includeAdjustedClose", "true");

        Ok(url)
    }

    /// Turn a chart response into raw records tagged with `symbol`.
    fn parse_response(
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        resp: ChartEnvelope,
    ) -> Result<Vec<RawRecord>, DataError> {
        let provider_err = |reason: String| DataError::Provider {
            instrument: symbol.to_string(),
            reason,
        };
        let no_data = || DataError::NoData {
            instrument: symbol.to_string(),
            start,
            end,
        };

        let result = match resp.chart.result {
            Some(result) => result,
            None => {
                return Err(match resp.chart.error {
                    Some(err) if err.code == "Not Found" => no_data(),
                    Some(err) => provider_err(format!("{}: {}", err.code, err.description)),
                    None => provider_err("empty result with no error".into()),
                })
            }
        };

        let Some(series) = result.into_iter().next() else {
            return Err(no_data());
        };

        // A range with no trading days comes back without a timestamp array.
        let Some(timestamps) = series.timestamp else {
            return Err(no_data());
        };

        let SeriesIndicators { quote, adjclose } = series.indicators;
        let quote = quote
            .into_iter()
            .next()
            .ok_or_else(|| provider_err("no quote data".into()))?;
        let adj_close: Vec<Option<f64>> = adjclose
            .and_then(|columns| columns.into_iter().next())
            .map(|column| column.adjclose)
            .unwrap_or_default();

        let mut records = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.into_iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| provider_err(format!("invalid timestamp: {ts}")))?
                .date_naive();

            let record = RawRecord {
                date,
                open: cell(&quote.open, i),
                high: cell(&quote.high, i),
                low: cell(&quote.low, i),
                close: cell(&quote.close, i),
                adj_close: cell(&adj_close, i),
                volume: cell(&quote.volume, i),
                ticker: symbol.to_string(),
            };
            if !is_padding(&record) {
                records.push(record);
            }
        }

        if records.is_empty() {
            return Err(no_data());
        }

        Ok(records)
    }
}

impl SourceClient for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, DataError> {
        validate_request(instrument, start, end)?;

        let provider_err = |reason: String| DataError::Provider {
            instrument: instrument.to_string(),
            reason,
        };

        let url = self.chart_url(instrument, start, end)?;
        tracing::debug!(%url, "requesting chart");

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| provider_err(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::NoData {
                instrument: instrument.to_string(),
                start,
                end,
            });
        }
        if !status.is_success() {
            return Err(provider_err(format!("HTTP {status}")));
        }

        let chart: ChartEnvelope = resp
            .json()
            .map_err(|e| provider_err(format!("failed to parse response: {e}")))?;

        Self::parse_response(instrument, start, end, chart)
    }
}
