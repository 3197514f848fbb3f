//! Bounded exponential backoff for calls that never reached the backend.
//!
//! Only failures where no response arrived are retried. Once the backend answers, with any
//! status, the answer is final: retrying a request the server already processed could repeat
//! a side effect.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per further retry.
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { retry: u32, delay: Duration },
    GiveUp { retries: u32 },
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the 1-based `retry`: `base_delay * factor^(retry - 1)`, capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Decides what to do after `retries_so_far` retries have already failed.
    pub fn plan(&self, retries_so_far: u32) -> RetryDecision {
        if retries_so_far >= self.max_retries {
            return RetryDecision::GiveUp {
                retries: retries_so_far,
            };
        }
        let retry = retries_so_far + 1;
        RetryDecision::Retry {
            retry,
            delay: self.delay_for_retry(retry),
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or the policy gives
/// up. `op` receives the 0-based attempt number and is re-invoked from scratch every time, so it
/// can re-read anything that may have changed during the backoff.
pub async fn retry_connection_failures<T, E, R, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    R: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        let err = match op(retries).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => err,
            Err(err) => return Err(err),
        };

        match policy.plan(retries) {
            RetryDecision::Retry { retry, delay } => {
                debug!(
                    retry,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis(),
                    "backend unreachable, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                retries = retry;
            }
            RetryDecision::GiveUp { retries } => {
                debug!(retries, "backend unreachable, giving up: {err}");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum FakeError {
        Unreachable,
        Answered(u16),
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                FakeError::Unreachable => write!(f, "connection refused"),
                FakeError::Answered(status) => write!(f, "status {status}"),
            }
        }
    }

    fn unreachable(err: &FakeError) -> bool {
        *err == FakeError::Unreachable
    }

    #[test]
    fn default_delays_double_from_one_second() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=3).map(|retry| policy.delay_for_retry(retry)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_millis(500),
            factor: 3,
            max_delay: Duration::from_secs(10),
        };
        let delays: Vec<_> = (1..=40).map(|retry| policy.delay_for_retry(retry)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays.last().copied(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn plan_gives_up_after_max_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.plan(0),
            RetryDecision::Retry {
                retry: 1,
                delay: Duration::from_secs(1),
            }
        );
        assert_eq!(policy.plan(3), RetryDecision::GiveUp { retries: 3 });
        assert_eq!(RetryPolicy::none().plan(0), RetryDecision::GiveUp { retries: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_are_retried_with_backoff_then_surface() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        let result: Result<(), FakeError> =
            retry_connection_failures(&RetryPolicy::default(), unreachable, |attempt| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts
                        .lock()
                        .expect("lock")
                        .push((attempt, started.elapsed()));
                    Err(FakeError::Unreachable)
                }
            })
            .await;

        assert_eq!(result, Err(FakeError::Unreachable));
        assert_eq!(
            *attempts.lock().expect("lock"),
            vec![
                (0, Duration::ZERO),
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(3)),
                (3, Duration::from_secs(7)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn any_response_is_final() {
        let mut calls = 0;
        let result: Result<(), FakeError> =
            retry_connection_failures(&RetryPolicy::default(), unreachable, |_| {
                calls += 1;
                async { Err(FakeError::Answered(503)) }
            })
            .await;

        assert_eq!(result, Err(FakeError::Answered(503)));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_the_backend_comes_back() {
        let result = retry_connection_failures(&RetryPolicy::default(), unreachable, |attempt| {
            async move {
                if attempt < 2 {
                    Err(FakeError::Unreachable)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
    }
}
