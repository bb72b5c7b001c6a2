//! Bounded retry with exponential backoff for completion calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use sessiongraph_llm::LlmError;

/// Retry policy applied around a single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Growth factor applied to the delay after each failure.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Deadline for one attempt; `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, LlmError>,
    /// Attempts actually made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy with no delays, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
            attempt_timeout: None,
        }
    }

    /// Delay before attempt `failed_attempt + 1`.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Backoff for `error`, honouring a provider `Retry-After` within the cap.
    fn delay_after(&self, failed_attempt: u32, error: &LlmError) -> Duration {
        let backoff = self.backoff_for(failed_attempt);
        match error.retry_after() {
            Some(hint) => hint.min(self.max_backoff).max(backoff),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by
    /// `attempt_timeout`; an elapsed deadline counts as a retryable failure.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(limit)),
                },
                None => op(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let backoff = self.delay_after(attempt, &error);
            warn!(
                operation,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error_kind = error.kind(),
                error = %error,
                "Request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(5000),
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(5000));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_retry_after_respected_within_cap() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        };
        let err = LlmError::RateLimit {
            message: "slow".into(),
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.delay_after(1, &err), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let outcome = RetryPolicy::default()
            .run("test", |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Network("reset".into()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_terminates() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::EmptyResponse("mock".into()))
            })
            .await;

        assert!(matches!(outcome.result, Err(LlmError::EmptyResponse(_))));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_early() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run("test", |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Auth("bad key".into()))
            })
            .await;

        assert!(matches!(outcome.result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let policy = RetryPolicy {
            attempt_timeout: Some(Duration::from_secs(5)),
            ..RetryPolicy::default()
        };
        let outcome = policy
            .run("test", |attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(attempt)
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let outcome = RetryPolicy::immediate(0).run("test", |_| async { Ok(1) }).await;
        assert_eq!(outcome.attempts, 1);
    }
}
