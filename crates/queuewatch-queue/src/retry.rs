//! Bounded retry for storage contention.

use std::future::Future;

use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::QueueError;

/// Run `op`, retrying while it fails with [`QueueError::Contention`].
///
/// Makes at most `max_attempts` attempts and sleeps `backoff_ms * attempt`
/// after each failed one. Any other error is returned immediately; when the
/// attempts run out the last contention error is returned.
pub async fn with_contention_retry<T, F, Fut>(
    policy: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_retryable() => {
                if attempt >= max_attempts {
                    error!(op = op_name, attempt, "Giving up after contention: {}", e);
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Store busy, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
