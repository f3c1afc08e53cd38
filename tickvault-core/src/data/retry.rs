//! Retry controller: bounded retries around a single source fetch.
//!
//! The default policy is three attempts with a constant five-second delay.
//! Exponential backoff is available as an opt-in.

use super::provider::{DataError, SourceClient};
use super::record::RawRecord;
use chrono::NaiveDate;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which a backoff sleep checks for cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed {
            delay: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based: the wait after the first failure is retry 0).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let seconds = base.as_secs_f64() * factor.powi(retry as i32);
                let capped = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));
                if !jitter || capped.is_zero() {
                    return capped;
                }
                let half = capped.as_millis() as u64 / 2;
                let offset = rand::thread_rng().gen_range(0..=half * 2);
                Duration::from_millis(capped.as_millis() as u64 - half + offset)
            }
        }
    }
}

/// Attempt budget and delay strategy for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Retry immediately; used by tests and synthetic runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }
}

/// Shared flag for cooperative cancellation of in-flight retries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fetch `instrument` with bounded retries.
///
/// Every failed attempt is logged with its attempt number. After
/// `max_attempts` consecutive failures the last error is returned.
/// Non-retryable errors are returned immediately.
pub fn with_retry(
    client: &dyn SourceClient,
    instrument: &str,
    start: NaiveDate,
    end: NaiveDate,
    policy: &RetryPolicy,
    cancel: Option<&CancelFlag>,
) -> Result<Vec<RawRecord>, DataError> {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            return Err(DataError::Cancelled);
        }

        tracing::info!(ticker = instrument, attempt, source = client.name(), "fetching");

        let err = match client.fetch(instrument, start, end) {
            Ok(records) => return Ok(records),
            Err(err) => err,
        };

        tracing::warn!(
            "attempt {attempt}/{max_attempts} failed for {instrument}: {err}"
        );

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt == max_attempts {
            tracing::error!("all retries failed for ticker={instrument}");
            return Err(err);
        }

        sleep_unless_cancelled(policy.backoff.delay(attempt - 1), cancel)?;
    }

    unreachable!("loop always returns on the last attempt")
}

/// Sleep for `delay`, waking early with `Cancelled` if the flag is raised.
fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancelFlag>) -> Result<(), DataError> {
    let Some(flag) = cancel else {
        std::thread::sleep(delay);
        return Ok(());
    };

    let deadline = Instant::now() + delay;
    loop {
        if flag.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Fails until `succeed_on` (1-based), then returns one record.
    struct FlakySource {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    impl FlakySource {
        fn always_failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on: None,
            }
        }

        fn succeeding_on(attempt: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on: Some(attempt),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SourceClient for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch(
            &self,
            instrument: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<RawRecord>, DataError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on == Some(call) {
                return Ok(vec![RawRecord {
                    date: start,
                    open: Some(1.0),
                    high: Some(1.0),
                    low: Some(1.0),
                    close: Some(1.0),
                    adj_close: Some(1.0),
                    volume: Some(1),
                    ticker: instrument.to_string(),
                }]);
            }
            Err(DataError::Provider {
                instrument: instrument.to_string(),
                reason: format!("boom #{call}"),
            })
        }
    }

    #[test]
    fn always_failing_source_is_called_max_attempts_times() {
        let source = FlakySource::always_failing();
        let policy = RetryPolicy::immediate(4);

        let err = with_retry(&source, "SPY", d("2024-01-02"), d("2024-01-02"), &policy, None)
            .unwrap_err();

        assert_eq!(source.calls(), 4);
        // The last error is the one re-raised
        assert!(err.to_string().contains("boom #4"));
    }

    #[test]
    fn success_on_attempt_k_calls_exactly_k_times() {
        let source = FlakySource::succeeding_on(2);
        let policy = RetryPolicy::immediate(3);

        let records =
            with_retry(&source, "SPY", d("2024-01-02"), d("2024-01-02"), &policy, None).unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticker, "SPY");
    }

    #[test]
    fn zero_attempt_budget_still_tries_once() {
        let source = FlakySource::always_failing();
        let policy = RetryPolicy::immediate(0);
        assert!(with_retry(&source, "SPY", d("2024-01-02"), d("2024-01-02"), &policy, None).is_err());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn non_retryable_error_is_not_retried() {
        struct Invalid;
        impl SourceClient for Invalid {
            fn name(&self) -> &str {
                "invalid"
            }
            fn fetch(&self, _: &str, _: NaiveDate, _: NaiveDate) -> Result<Vec<RawRecord>, DataError> {
                Err(DataError::InvalidRequest("bad range".into()))
            }
        }

        let err = with_retry(
            &Invalid,
            "SPY",
            d("2024-01-02"),
            d("2024-01-02"),
            &RetryPolicy::immediate(5),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidRequest(_)));
    }

    #[test]
    fn cancelled_flag_stops_before_first_attempt() {
        let source = FlakySource::succeeding_on(1);
        let flag = CancelFlag::new();
        flag.cancel();

        let err = with_retry(
            &source,
            "SPY",
            d("2024-01-02"),
            d("2024-01-02"),
            &RetryPolicy::default(),
            Some(&flag),
        )
        .unwrap_err();

        assert!(matches!(err, DataError::Cancelled));
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn cancellation_interrupts_backoff_sleep() {
        let source = FlakySource::always_failing();
        let flag = CancelFlag::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));

        let canceller = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let started = Instant::now();
        let err = with_retry(
            &source,
            "SPY",
            d("2024-01-02"),
            d("2024-01-02"),
            &policy,
            Some(&flag),
        )
        .unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, DataError::Cancelled));
        assert_eq!(source.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn default_policy_is_three_attempts_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay(0), Duration::from_secs(5));
        assert_eq!(policy.backoff.delay(7), Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_grows_until_cap() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_millis(500),
            jitter: false,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(10), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_half_of_delay() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(200),
            factor: 1.0,
            max: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..100 {
            let delay = backoff.delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
