//! Exponential backoff for the non-streaming plan request

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `op` until it succeeds, fails with a cancellation, or the policy's
/// retries are used up. The last error is returned in that case.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                tracing::warn!(
                    "Request failed ({}), retrying in {:?} ({}/{})",
                    e,
                    delay,
                    attempt,
                    policy.max_retries
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
