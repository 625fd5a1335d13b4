use std::future::Future;
use tracing::warn;

use crate::config::RetryConfig;
use crate::store::StoreResult;

/// Run a store call, retrying transient failures with exponential backoff
pub async fn with_store_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut call: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
