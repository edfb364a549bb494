//! # Retry / Backoff Primitive
//!
//! Runs a fallible async operation with exponential backoff and jitter.
//! Every component that talks to a remote system goes through here.
//!
//! ## Retry Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          retry_notify()                                 │
//! │                                                                         │
//! │   attempt = 1                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   ┌────────┐   Ok    ┌───────────────────────────────┐                 │
//! │   │ op()   │───────► │ RetryOutcome { Ok, attempts } │                 │
//! │   └───┬────┘         └───────────────────────────────┘                 │
//! │       │ Err                                                             │
//! │       ▼                                                                 │
//! │   Permanent (abort)? ─── yes ──► outcome, retryable = false            │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │   message matches retryable_patterns? ── no ──► outcome, terminal      │
//! │       │ yes                                                             │
//! │       ▼                                                                 │
//! │   attempt < max_attempts? ── no ──► outcome, retryable (exhausted)     │
//! │       │ yes                                                             │
//! │       ▼                                                                 │
//! │   sleep min(initial × mult^(attempt-1), max) ± 25%                     │
//! │   attempt += 1, loop                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The primitive never panics and never hides the final error: the caller
//! gets a [`RetryOutcome`] and decides whether exhaustion is fatal.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Jitter applied to every computed delay (±25%).
pub const JITTER_FACTOR: f64 = 0.25;

/// Default substrings that mark an error message as transient.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "unavailable",
    "econnreset",
    "econnrefused",
    "temporarily",
    "rate limit",
    "502",
    "503",
    "504",
];

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    pub initial_delay: Duration,

    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Case-insensitive substrings; an error matching none is terminal.
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Whether an error message matches one of the retryable patterns.
    pub fn is_retryable_message(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.retryable_patterns
            .iter()
            .any(|pattern| message.contains(&pattern.to_lowercase()))
    }

    /// Exponential backoff schedule for one `retry` call.
    fn backoff(&self) -> ExponentialBackoff {
        // The first interval is used as-is, so it has to respect the cap too
        let first = self.initial_delay.min(self.max_delay);
        ExponentialBackoff {
            current_interval: first,
            initial_interval: first,
            randomization_factor: JITTER_FACTOR,
            multiplier: self.backoff_multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None, // attempts bound the loop, not wall time
            ..Default::default()
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,

    /// Attempts actually made (at least 1).
    pub attempts: u32,

    /// Wall time including backoff sleeps.
    pub total_time: Duration,

    /// Whether the final error was classified as transient.
    /// Always `false` on success and for explicit aborts.
    pub retryable: bool,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Retries `op` under `config` without an observer.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, op: F) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
{
    retry_notify(config, op, |_: &E, _: u32, _: Duration| {}).await
}

/// Retries `op` under `config`, calling `notify(error, attempt, delay)`
/// before each backoff sleep.
///
/// `op` marks an abort with [`backoff::Error::Permanent`]; such errors are
/// returned immediately and never retried. Transient errors are retried
/// only when their message matches a retryable pattern. A transient error
/// carrying `retry_after` sleeps for that hint (capped at `max_delay`)
/// instead of the computed delay.
pub async fn retry_notify<T, E, F, Fut, N>(
    config: &RetryConfig,
    mut op: F,
    mut notify: N,
) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
    N: FnMut(&E, u32, Duration),
{
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let (err, retry_after) = match op().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    total_time: started.elapsed(),
                    retryable: false,
                }
            }
            Err(backoff::Error::Permanent(err)) => {
                debug!(attempt, error = %err, "Operation aborted");
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    total_time: started.elapsed(),
                    retryable: false,
                };
            }
            Err(backoff::Error::Transient { err, retry_after }) => (err, retry_after),
        };

        let retryable = config.is_retryable_message(&err.to_string());
        if !retryable || attempt >= max_attempts {
            debug!(attempt, retryable, error = %err, "Giving up");
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
                total_time: started.elapsed(),
                retryable,
            };
        }

        let computed = backoff.next_backoff().unwrap_or(config.max_delay);
        let delay = retry_after.map_or(computed, |hint| hint.min(config.max_delay));

        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after backoff");
        notify(&err, attempt, delay);
        tokio::time::sleep(delay).await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Inclusive range the jittered delay after the `attempt`-th failure
    /// (1-based) must fall in.
    fn delay_bounds(config: &RetryConfig, attempt: u32) -> (Duration, Duration) {
        let exponent = attempt.saturating_sub(1) as i32;
        let initial = config.initial_delay.min(config.max_delay).as_millis() as f64;
        let base = (initial * config.backoff_multiplier.powi(exponent))
            .min(config.max_delay.as_millis() as f64);
        (
            Duration::from_millis((base * (1.0 - JITTER_FACTOR)).floor() as u64),
            // float drift in the schedule plus the crate's inclusive upper pick
            Duration::from_millis((base * (1.0 + JITTER_FACTOR)).ceil() as u64 + 1),
        )
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            ..Default::default()
        }
    }

    #[test]
    fn test_pattern_match_is_case_insensitive() {
        let config = RetryConfig::default();
        assert!(config.is_retryable_message("Connection reset by peer"));
        assert!(config.is_retryable_message("HTTP 503 Service Unavailable"));
        assert!(config.is_retryable_message("request TIMED OUT"));
        assert!(!config.is_retryable_message("schema validation failed"));
    }

    #[test]
    fn test_third_attempt_sleeps_four_seconds_give_or_take_a_quarter() {
        let config = RetryConfig::default();
        let mut schedule = config.backoff();
        let third = (0..3).filter_map(|_| schedule.next_backoff()).last().unwrap();
        assert!(third >= Duration::from_millis(3000), "{third:?}");
        assert!(third <= Duration::from_millis(5001), "{third:?}");
    }

    proptest! {
        #[test]
        fn prop_slept_delays_follow_the_capped_schedule(
            attempts in 1u32..40,
            initial in 1u64..5000,
            max in 1u64..60_000,
        ) {
            let config = RetryConfig {
                initial_delay: Duration::from_millis(initial),
                max_delay: Duration::from_millis(max),
                ..Default::default()
            };
            let mut schedule = config.backoff();
            for attempt in 1..=attempts {
                let delay = schedule.next_backoff();
                prop_assert!(delay.is_some(), "schedule ended at attempt {}", attempt);
                let delay = delay.unwrap_or_default();
                let (low, high) = delay_bounds(&config, attempt);
                prop_assert!(delay >= low, "attempt {}: {:?} < {:?}", attempt, delay, low);
                prop_assert!(delay <= high, "attempt {}: {:?} > {:?}", attempt, delay, high);
                prop_assert!(delay.as_millis() <= u128::from(max) * 5 / 4 + 1);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let mut delays = Vec::new();

        let outcome = retry_notify(
            &fast_config(),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(backoff::Error::transient("network unreachable"))
                } else {
                    Ok(42)
                }
            },
            |_: &&str, attempt, delay| delays.push((attempt, delay)),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.data(), Some(&42));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(delays.len(), 2);

        let config = fast_config();
        for (attempt, delay) in delays {
            let (low, high) = delay_bounds(&config, attempt);
            assert!(delay >= low, "attempt {attempt}: {delay:?} < {low:?}");
            assert!(delay <= high, "attempt {attempt}: {delay:?} > {high:?}");
        }
        assert!(outcome.total_time >= Duration::from_millis(75 + 150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> = retry(&fast_config(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(backoff::Error::transient("connection refused"))
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.retryable);
        assert_eq!(outcome.error(), Some(&"connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> = retry(&fast_config(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(backoff::Error::transient("invalid payload"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.retryable);
        assert_eq!(outcome.total_time, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_never_retried() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> = retry(&fast_config(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            // Matches a retryable pattern, but the caller aborted.
            Err(backoff::Error::permanent("timeout: cancelled by user"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.retryable);
        assert!(!outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_capped() {
        let calls = &AtomicU32::new(0);
        let mut observed = Vec::new();

        let _ = retry_notify(
            &fast_config(),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(backoff::Error::retry_after("rate limit", Duration::from_secs(60)))
                } else {
                    Ok(())
                }
            },
            |_: &&str, _, delay| observed.push(delay),
        )
        .await;

        assert_eq!(observed, vec![Duration::from_millis(1000)]);
    }
}
