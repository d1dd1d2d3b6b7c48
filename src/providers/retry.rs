//! Exponential-backoff retry wrapper shared by every provider adapter.
//!
//! Policy (see `SPEC_FULL.md` §4.2): a single logical request is attempted up
//! to `max_retries` times *total* — not `max_retries` retries on top of an
//! initial attempt. Before attempt `i` (0-indexed), the wrapper sleeps
//! `retry_delay * 2^(i-1)` for every `i >= 1`; the first attempt never
//! sleeps. Every transport-level or non-2xx failure counts toward the
//! budget — callers that want to distinguish terminal from transient errors
//! do so at the result level (`SummarizationResult.error`), not here, because
//! the subsystem's contract is that a summarization call never raises.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Retry configuration for a single provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total number of attempts, including the first. Must be >= 1.
    pub max_retries: u32,
    /// Base backoff, doubled on each subsequent attempt.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Run `f` under the retry policy, returning the last error if every attempt
/// fails. `f` is invoked at most `config.max_retries` times.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    with_retry_cancellable(config, None, f).await
}

/// [`with_retry`], but honoring a batch-level [`CancellationToken`]
/// (SPEC_FULL.md §5 "Cancellation"). The token is observed at two points:
/// a backoff sleep races the token and returns early if it fires, and the
/// loop checks cancellation before starting the next attempt so an
/// in-flight call that just failed doesn't get retried after the caller
/// gave up. A call already in progress when the token fires is not
/// forcibly aborted here — that is `f`'s own responsibility (e.g. racing
/// its request against `cancel.cancelled()`), this wrapper only owns the
/// space *between* attempts.
pub async fn with_retry_cancellable<F, Fut, T>(
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = config.max_retries.max(1);
    let mut last_err = None;

    for i in 0..attempts {
        if let Some(token) = cancel
            && token.is_cancelled()
        {
            anyhow::bail!("provider request cancelled");
        }

        if i > 0 {
            let backoff = config.retry_delay * 2u32.pow(i - 1);
            tracing::warn!(
                attempt = i + 1,
                max_retries = attempts,
                backoff_ms = backoff.as_millis(),
                "retrying provider request after failure"
            );
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = token.cancelled() => anyhow::bail!("provider request cancelled during backoff"),
                    }
                }
                None => tokio::time::sleep(backoff).await,
            }
        }

        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = with_retry(&config, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_retries_attempts() {
        let config = RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<i32> = with_retry(&config, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("HTTP 500")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_retry_budget_makes_one_attempt_no_sleep() {
        let config = RetryConfig {
            max_retries: 1,
            retry_delay: Duration::from_secs(10),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let start = std::time::Instant::now();
        let result: Result<i32> = with_retry(&config, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let config = RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = with_retry(&config, || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("HTTP 503")
                } else {
                    Ok::<_, anyhow::Error>("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_first_attempt() {
        let config = RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        };
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<i32> = with_retry_cancellable(&config, Some(&token), || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("should not run")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts_remaining_attempts() {
        let config = RetryConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
        };
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let token2 = token.clone();

        let result: Result<i32> = with_retry_cancellable(&config, Some(&token), || {
            let calls = calls2.clone();
            let token = token2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    token.cancel();
                }
                anyhow::bail!("HTTP 500")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
