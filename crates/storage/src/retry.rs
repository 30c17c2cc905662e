//! Exponential backoff retry for store calls

use std::future::Future;

use checkpoint_core::{Error, RetryConfig};
use tracing::warn;

/// Final error of a retried operation and how many attempts were made
#[derive(Debug)]
pub(crate) struct RetryFailure {
    pub error: Error,
    pub attempts: u32,
}

/// Execute an async operation, retrying retryable errors with backoff
///
/// Non-retryable errors are returned immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut f: F,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = checkpoint_core::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                return Err(RetryFailure {
                    error: e,
                    attempts: attempt,
                });
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    %operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
