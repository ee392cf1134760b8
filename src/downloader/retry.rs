//! Retry with exponential backoff for transient download failures.
//!
//! A failure is retryable when its message contains one of a fixed set of
//! markers (rate limiting, gateway errors, timeouts, connection problems).
//! Anything else is treated as fatal and surfaces on the first attempt.
//!
//! The policy blocks the calling thread while it backs off, so async callers
//! run it inside `spawn_blocking`.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default maximum attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Case-insensitive substrings that mark a failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "http error 429",
    "http error 503",
    "http error 502",
    "connectionerror",
    "timeout",
    "readtimeout",
    "network",
    "unable to download",
    "429",
    "502",
    "503",
    "connection",
];

/// Slice used when a backoff can be interrupted by cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Whether an error message describes a transient failure.
pub fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Errors the policy knows how to classify.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Marker produced when a retry sequence is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Blocking sleep between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration, cancel: Option<&CancellationToken>);
}

/// Real thread sleep. Wakes early when the token is cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: Option<&CancellationToken>) {
        let Some(token) = cancel else {
            std::thread::sleep(duration);
            return;
        };

        let mut remaining = duration;
        while !remaining.is_zero() && !token.is_cancelled() {
            let step = remaining.min(CANCEL_POLL);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// Exponential backoff configuration.
///
/// Delay before retry `n` (0-indexed) is `initial_delay * backoff_multiplier^n`.
/// No sleep follows the final attempt.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        self.initial_delay.mul_f64(factor.max(0.0))
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// The last error is returned unchanged.
    pub fn execute_with_retry<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Retryable + Display + From<Cancelled>,
    {
        self.run(op, None)
    }

    /// Same as [`execute_with_retry`](Self::execute_with_retry), but stops
    /// before the next attempt once `cancel` fires.
    pub fn execute_cancellable<T, E, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Retryable + Display + From<Cancelled>,
    {
        self.run(op, Some(cancel))
    }

    fn run<T, E, F>(&self, mut op: F, cancel: Option<&CancellationToken>) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Retryable + Display + From<Cancelled>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                return Err(Cancelled.into());
            }

            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(attempt = attempt + 1, error = %err, "Non-retryable failure");
                return Err(err);
            }

            if attempt + 1 >= self.max_attempts {
                warn!(
                    attempts = self.max_attempts,
                    error = %err,
                    "Retry attempts exhausted"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "Transient failure, retrying"
            );
            self.sleeper.sleep(delay, cancel);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::DownloadError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration, _cancel: Option<&CancellationToken>) {
            self.delays.lock().push(duration);
        }
    }

    fn policy(sleeper: Arc<RecordingSleeper>) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(5), 2.0).with_sleeper(sleeper)
    }

    #[test]
    fn test_retryable_taxonomy() {
        assert!(is_retryable_error("HTTP Error 429: Too Many Requests"));
        assert!(is_retryable_error("http error 503"));
        assert!(is_retryable_error("Got 502 from upstream"));
        assert!(is_retryable_error("Read Timeout"));
        assert!(is_retryable_error("Network is unreachable"));
        assert!(is_retryable_error("ERROR: Unable to download webpage"));
        assert!(!is_retryable_error("Video unavailable"));
        assert!(!is_retryable_error(""));
    }

    #[test]
    fn test_succeeds_after_two_transient_failures() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut calls = 0;

        let result: Result<&str, DownloadError> = policy(sleeper.clone()).execute_with_retry(|| {
            calls += 1;
            if calls < 3 {
                Err(DownloadError::Network("HTTP Error 503".to_string()))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
        assert_eq!(
            *sleeper.delays.lock(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut calls = 0;

        let result: Result<(), DownloadError> = policy(sleeper.clone()).execute_with_retry(|| {
            calls += 1;
            Err(DownloadError::InvalidUrl("not a url".to_string()))
        });

        assert!(matches!(result, Err(DownloadError::InvalidUrl(_))));
        assert_eq!(calls, 1);
        assert!(sleeper.delays.lock().is_empty());
    }

    #[test]
    fn test_exhausted_attempts_return_last_error() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut calls = 0;

        let result: Result<(), DownloadError> = policy(sleeper.clone()).execute_with_retry(|| {
            calls += 1;
            Err(DownloadError::NetworkTimeout(format!("attempt {}", calls)))
        });

        match result {
            Err(DownloadError::NetworkTimeout(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        // No sleep after the final attempt
        assert_eq!(sleeper.delays.lock().len(), 2);
    }

    #[test]
    fn test_cancelled_token_stops_sequence() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let token = CancellationToken::new();
        let mut calls = 0;

        let result: Result<(), DownloadError> =
            policy(sleeper).execute_cancellable(&token, || {
                calls += 1;
                token.cancel();
                Err(DownloadError::Network("connection reset".to_string()))
            });

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_delay_growth() {
        let p = RetryPolicy::new(4, Duration::from_millis(250), 4.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(250));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 2.0).max_attempts(), 1);
    }
}
