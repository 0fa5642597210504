use crate::config::RetryPolicy;
use crate::error::Result;
use std::future::Future;
use tracing::warn;

/// Run an idempotent collaborator call, retrying retryable failures with
/// exponential backoff. Non-retryable errors return immediately.
pub async fn retry_idempotent<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "collaborator call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_idempotent(&fast_policy(3), "read", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::StorageUnavailable("timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent(&fast_policy(2), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::ProviderUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_data_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent(&fast_policy(5), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidInput("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
