//! Retry with optional exponential backoff for conversation turns

use std::time::{Duration, SystemTime};

use futures::future::LocalBoxFuture;

use crate::Error;

/// Retry policy for whole-turn attempts
///
/// `max_attempts` counts the first try. With `base_delay` of zero the retry
/// is immediate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting between attempts
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Whether an error comes from a transiently unavailable remote endpoint
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    matches!(error, Error::Transport(e) if e.is_unavailable())
}

/// Compute the delay before the attempt following `attempt` (0-based)
///
/// `min(base_delay * 2^attempt + jitter, max_delay)`, where jitter is 0-25%
/// of the computed delay derived from the system clock.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    if base.is_zero() {
        return base;
    }

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

/// Run `op` against `state` until it succeeds, fails with a non-retryable
/// error, or the policy's attempt budget is spent
///
/// `op` receives the 1-based attempt number. Transport failures come back as
/// [`Error::Turn`] carrying the attempt count and the last transport error
/// unchanged; other errors pass through.
///
/// # Errors
///
/// Returns the last error produced by `op`
pub async fn retry_with<S, T, F, P>(
    policy: &RetryPolicy,
    retryable: P,
    state: &mut S,
    mut op: F,
) -> Result<T, Error>
where
    S: ?Sized,
    F: for<'a> FnMut(&'a mut S, u32) -> LocalBoxFuture<'a, Result<T, Error>>,
    P: Fn(&Error) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(state, attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && retryable(&e) => {
                let delay = delay_for_attempt(policy, attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "turn attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(Error::Transport(source)) => {
                return Err(Error::Turn {
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransportError, TransportStatus};

    fn unavailable() -> Error {
        Error::Transport(TransportError::unavailable("connection refused"))
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(is_retryable(&unavailable()));
        assert!(!is_retryable(&Error::Transport(TransportError::new(
            TransportStatus::DeadlineExceeded,
            "deadline"
        ))));
        assert!(!is_retryable(&Error::Audio("device gone".to_string())));
        assert!(!is_retryable(&Error::Turn {
            attempts: 3,
            source: TransportError::unavailable("x"),
        }));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let mut calls = 0u32;
        let result: Result<(), Error> =
            retry_with(&RetryPolicy::immediate(3), is_retryable, &mut calls, |calls, _| {
                *calls += 1;
                Box::pin(async { Err(unavailable()) })
            })
            .await;

        assert_eq!(calls, 3);
        match result {
            Err(Error::Turn { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, TransportError::unavailable("connection refused"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut seen = Vec::new();
        let result = retry_with(&RetryPolicy::immediate(3), is_retryable, &mut seen, |seen, attempt| {
            seen.push(attempt);
            Box::pin(async move { if attempt < 3 { Err(unavailable()) } else { Ok(attempt) } })
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let mut calls = 0u32;
        let result: Result<(), Error> =
            retry_with(&RetryPolicy::immediate(3), is_retryable, &mut calls, |calls, _| {
                *calls += 1;
                Box::pin(async {
                    Err(Error::Transport(TransportError::new(
                        TransportStatus::Unauthenticated,
                        "bad token",
                    )))
                })
            })
            .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(Error::Turn { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn local_errors_pass_through() {
        let result: Result<(), Error> =
            retry_with(&RetryPolicy::immediate(3), is_retryable, &mut (), |_, _| {
                Box::pin(async { Err(Error::Audio("no input device".to_string())) })
            })
            .await;

        assert!(matches!(result, Err(Error::Audio(_))));
    }

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };

        assert!(delay_for_attempt(&policy, 0) >= Duration::from_millis(100));
        assert!(delay_for_attempt(&policy, 1) >= Duration::from_millis(200));
        assert!(delay_for_attempt(&policy, 2) >= Duration::from_millis(400));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
        };

        assert!(delay_for_attempt(&policy, 3) <= policy.max_delay);
    }

    #[test]
    fn immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(delay_for_attempt(&policy, 0), Duration::ZERO);
        assert_eq!(delay_for_attempt(&policy, 2), Duration::ZERO);
    }

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }
}
