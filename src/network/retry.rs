use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::error::FetchError;

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up (`RetryExhausted`).
pub(crate) async fn with_retry<F, Fut, T>(f: F, policy: &RetryPolicy) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let delay = policy.retry_delay();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Attempt {} of {}", attempt, max_attempts);
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("Operation succeeded after {} retries", attempt - 1);
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                warn!("Attempt {} failed with non-retryable error: {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!("Operation failed after {} attempts: {}", attempt, e);
                    return Err(FetchError::RetryExhausted(Box::new(e)));
                }
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::test;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay_secs: 0.01,
        }
    }

    #[test]
    async fn test_succeeds_after_retry() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FetchError::HttpStatus(503))
                } else {
                    Ok("ok")
                }
            },
            &policy(3),
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    async fn test_exhausts_with_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::EmptyBody)
            },
            &policy(2),
        )
        .await;
        assert_eq!(result, Err(FetchError::RetryExhausted(Box::new(FetchError::EmptyBody))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Utf8Decoding)
            },
            &policy(5),
        )
        .await;
        assert_eq!(result, Err(FetchError::Utf8Decoding));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
